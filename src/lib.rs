//! # mergebot-rs
//!
//! Helpdesk housekeeping bot. Merges duplicate tickets and duplicate end
//! users, and propagates the escalation reason from parent tickets to the
//! child tickets spawned from their side conversations.
//!
//! Passes are driven through [`engine::Engine`] against any
//! [`adapter::TicketSource`] + [`adapter::UserDirectory`]; the Zendesk REST
//! client and an in-memory desk ship with the crate.

pub mod adapter;
pub mod cluster;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod identity;
pub mod model;
pub mod resolver;
pub mod telemetry;
