//! The helpdesk seen from the bot: the only place that touches the network.
//!
//! Engines are generic over [`TicketSource`] and [`UserDirectory`]. Lookups
//! return `Ok(None)` for "not there" and `Err` for infrastructure trouble;
//! retries and pacing stay inside the implementation.

pub mod memory;
pub mod retry;
pub mod zendesk;

pub use memory::InMemoryDesk;
pub use zendesk::ZendeskClient;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeSet;

use crate::error::Result;
use crate::model::{
    AuditEvent, SideConversation, Ticket, TicketId, TicketStatus, User, UserId, UserIdentity,
};

/// Which tickets a pass starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketFilter {
    /// Every ticket created at or after the instant.
    CreatedSince(DateTime<Utc>),
    /// Contents of a saved view.
    View(u64),
    Query(TicketQuery),
}

impl TicketFilter {
    /// Unsolved tickets created after `since`: the merge pass batch.
    pub fn unsolved_since(since: DateTime<Utc>) -> Self {
        TicketFilter::Query(TicketQuery {
            status: Some(StatusFilter::Below(TicketStatus::Solved)),
            created_after: Some(since),
            ..TicketQuery::default()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Is(TicketStatus),
    /// Strictly earlier in the lifecycle than the given status.
    Below(TicketStatus),
}

impl StatusFilter {
    pub fn matches(self, status: TicketStatus) -> bool {
        match self {
            StatusFilter::Is(s) => status == s,
            StatusFilter::Below(s) => status_rank(status) < status_rank(s),
        }
    }
}

fn status_rank(status: TicketStatus) -> u8 {
    match status {
        TicketStatus::New => 0,
        TicketStatus::Open => 1,
        TicketStatus::Pending => 2,
        TicketStatus::Hold => 3,
        TicketStatus::Solved => 4,
        TicketStatus::Closed => 5,
        TicketStatus::Archived => 6,
        TicketStatus::Unknown => u8::MAX,
    }
}

/// Structured ticket search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketQuery {
    pub status: Option<StatusFilter>,
    pub created_after: Option<DateTime<Utc>>,
    pub solved_after: Option<DateTime<Utc>>,
    pub channel: Option<String>,
}

impl TicketQuery {
    /// Render as a helpdesk search expression.
    pub fn to_search_query(&self) -> String {
        let mut q = String::from("type:ticket");
        match self.status {
            Some(StatusFilter::Is(s)) => q.push_str(&format!(" status:{s}")),
            Some(StatusFilter::Below(s)) => q.push_str(&format!(" status<{s}")),
            None => {}
        }
        if let Some(at) = self.created_after {
            q.push_str(&format!(" created>{}", iso_utc(at)));
        }
        if let Some(at) = self.solved_after {
            q.push_str(&format!(" solved>{}", iso_utc(at)));
        }
        if let Some(ref channel) = self.channel {
            q.push_str(&format!(" via:{channel}"));
        }
        q
    }
}

pub fn iso_utc(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Ticket reads and writes.
#[async_trait]
pub trait TicketSource: Send + Sync {
    async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>>;

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>>;

    /// Change history, oldest first.
    async fn get_ticket_audits(&self, id: TicketId) -> Result<Vec<AuditEvent>>;

    /// Side conversations opened from a ticket.
    async fn list_side_conversations(&self, id: TicketId) -> Result<Vec<SideConversation>>;

    /// Read a custom field off an already fetched ticket.
    fn get_custom_field<'t>(&self, ticket: &'t Ticket, field_id: u64) -> Option<&'t serde_json::Value> {
        ticket.custom_field(field_id)
    }

    async fn set_custom_field(
        &self,
        id: TicketId,
        field_id: u64,
        value: &serde_json::Value,
    ) -> Result<()>;

    async fn post_comment(&self, id: TicketId, body: &str, public: bool) -> Result<()>;

    /// Fold `source` into `target`. Already-merged sources count as success.
    async fn merge(&self, source: TicketId, target: TicketId) -> Result<()>;
}

/// User and organisation reads, plus user merges.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    /// Batched profile fetch. Unknown ids are simply absent from the result.
    async fn get_users_many(&self, ids: &[UserId]) -> Result<Vec<User>>;

    async fn get_user_identities(&self, id: UserId) -> Result<Vec<UserIdentity>>;

    /// Free-text user search (email, phone, name).
    async fn search_users(&self, term: &str) -> Result<Vec<User>>;

    async fn merge_users(&self, source: UserId, target: UserId) -> Result<()>;

    async fn get_organization_domains(&self, org_id: u64) -> Result<BTreeSet<String>>;
}
