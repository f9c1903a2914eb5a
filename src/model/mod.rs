//! Core data model.
//!
//! Tickets and users are owned by the helpdesk; the bot only reads them and
//! issues write commands through the adapter. Everything here lives for one run.

pub mod report;
pub mod ticket;
pub mod user;

pub use report::{Action, ItemOutcome, Outcome, RunResult, SkipReason};
pub use ticket::{
    AuditEvent, CustomFieldEntry, SideConversation, Ticket, TicketId, TicketStatus, Via,
    ViaEndpoint, ViaSource,
};
pub use user::{User, UserId, UserIdentity};

use serde::{Deserialize, Deserializer};

/// Accept an id sent either as a JSON number or as a numeric string.
///
/// Anything else (null, empty string, non-numeric text) decodes as `None`
/// rather than failing the whole payload.
pub(crate) fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
