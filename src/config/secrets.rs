//! Secret handling utilities.
//!
//! Re-exports secrecy types so adapters can hold credentials without
//! depending on secrecy directly.

pub use secrecy::{ExposeSecret, SecretString};
