//! Ticket records as the helpdesk reports them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;
use super::lenient_id;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Helpdesk ticket id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub u64);

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    New,
    Open,
    Pending,
    Hold,
    Solved,
    Closed,
    /// Closed tickets that have aged out of the live index.
    Archived,
    #[serde(other)]
    Unknown,
}

impl TicketStatus {
    /// Closed and archived tickets cannot receive merges.
    pub fn blocks_merge(self) -> bool {
        matches!(self, TicketStatus::Closed | TicketStatus::Archived)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TicketStatus::New => "new",
            TicketStatus::Open => "open",
            TicketStatus::Pending => "pending",
            TicketStatus::Hold => "hold",
            TicketStatus::Solved => "solved",
            TicketStatus::Closed => "closed",
            TicketStatus::Archived => "archived",
            TicketStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Via descriptor
// ---------------------------------------------------------------------------

pub const SIDE_CONVERSATION: &str = "side_conversation";

/// How a ticket (or an audit) came into being.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Via {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub source: Option<ViaSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViaSource {
    #[serde(default)]
    pub rel: Option<String>,
    #[serde(default)]
    pub from: Option<ViaEndpoint>,
    #[serde(default)]
    pub to: Option<ViaEndpoint>,
}

/// One end of a via link. Only the ticket-typed shape matters here; every
/// other field the platform sends is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViaEndpoint {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<u64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub ticket_id: Option<u64>,
}

impl Via {
    pub fn side_conversation_from(source_ticket: TicketId) -> Self {
        Self {
            channel: Some(SIDE_CONVERSATION.to_string()),
            source: Some(ViaSource {
                rel: Some(SIDE_CONVERSATION.to_string()),
                from: Some(ViaEndpoint {
                    kind: Some("ticket".to_string()),
                    id: Some(source_ticket.0),
                    ticket_id: None,
                }),
                to: None,
            }),
        }
    }

    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            source: None,
        }
    }

    /// True when either the channel or the source relation says side conversation.
    pub fn declares_side_conversation(&self) -> bool {
        let by_channel = self
            .channel
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(SIDE_CONVERSATION));
        let by_rel = self
            .source
            .as_ref()
            .and_then(|s| s.rel.as_deref())
            .is_some_and(|r| r.eq_ignore_ascii_case(SIDE_CONVERSATION));
        by_channel || by_rel
    }

    /// The ticket this one was spawned from, if the descriptor names one.
    pub fn side_conversation_source(&self) -> Option<TicketId> {
        if !self.declares_side_conversation() {
            return None;
        }
        let from = self.source.as_ref()?.from.as_ref()?;
        match from.kind.as_deref() {
            Some(kind) if kind.eq_ignore_ascii_case("ticket") => {
                from.id.or(from.ticket_id).map(TicketId)
            }
            Some(_) => None,
            None => from.ticket_id.map(TicketId),
        }
    }
}

// ---------------------------------------------------------------------------
// Custom fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldEntry {
    pub id: u64,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// Null, empty strings and empty arrays all count as "no value".
fn is_blank(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// A support request record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub requester_id: UserId,
    #[serde(default)]
    pub subject: Option<String>,
    pub status: TicketStatus,
    #[serde(default)]
    pub via: Option<Via>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub assignee_id: Option<UserId>,
    #[serde(default)]
    pub custom_fields: Vec<CustomFieldEntry>,
}

impl Ticket {
    /// Minimal open email ticket, mostly for tests and fixtures.
    pub fn new(id: u64, requester_id: u64, subject: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: TicketId(id),
            requester_id: UserId(requester_id),
            subject: Some(subject.to_string()),
            status: TicketStatus::Open,
            via: Some(Via::channel("email")),
            created_at,
            updated_at: created_at,
            assignee_id: None,
            custom_fields: Vec::new(),
        }
    }

    pub fn status(mut self, status: TicketStatus) -> Self {
        self.status = status;
        self
    }

    pub fn via(mut self, via: Via) -> Self {
        self.via = Some(via);
        self
    }

    pub fn assignee(mut self, assignee_id: u64) -> Self {
        self.assignee_id = Some(UserId(assignee_id));
        self
    }

    pub fn field(mut self, field_id: u64, value: serde_json::Value) -> Self {
        self.custom_fields.retain(|f| f.id != field_id);
        self.custom_fields.push(CustomFieldEntry {
            id: field_id,
            value: Some(value),
        });
        self
    }

    /// Lowercased channel tag, `"unknown"` when the platform sent none.
    pub fn channel(&self) -> String {
        self.via
            .as_ref()
            .and_then(|v| v.channel.as_deref())
            .unwrap_or("unknown")
            .to_lowercase()
    }

    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }

    /// The non-blank value of a custom field.
    pub fn custom_field(&self, field_id: u64) -> Option<&serde_json::Value> {
        self.custom_fields
            .iter()
            .find(|f| f.id == field_id)
            .and_then(|f| f.value.as_ref())
            .filter(|v| !is_blank(v))
    }
}

// ---------------------------------------------------------------------------
// Audits
// ---------------------------------------------------------------------------

/// One event from a ticket's change history, flattened with the metadata of
/// the audit that carried it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub audit_id: u64,
    /// Platform event type, e.g. `Create`, `Comment`, `Change`.
    pub kind: String,
    #[serde(default)]
    pub via: Option<Via>,
    #[serde(default)]
    pub public: Option<bool>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub author_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn is_creation(&self) -> bool {
        self.kind.eq_ignore_ascii_case("create")
    }

    pub fn is_private_comment(&self) -> bool {
        self.kind.eq_ignore_ascii_case("comment") && self.public == Some(false)
    }
}

// ---------------------------------------------------------------------------
// Side conversations
// ---------------------------------------------------------------------------

/// A side conversation opened from a ticket. When it spawned a child ticket,
/// `target_ticket_id` names that child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideConversation {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub target_ticket_id: Option<TicketId>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}
