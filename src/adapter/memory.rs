//! In-memory helpdesk for tests and local dry runs.
//!
//! Writes mutate the stored records the way the platform would (a merged
//! source is closed, a comment shows up in the audit trail), so passes can be
//! re-run against the result. Individual calls can be made to fail.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{TicketFilter, TicketSource, UserDirectory};
use crate::error::{Error, Result};
use crate::model::{
    AuditEvent, CustomFieldEntry, SideConversation, Ticket, TicketId, TicketStatus, User,
    UserId, UserIdentity,
};

/// A call that should fail with a 500.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Failpoint {
    ListTickets,
    GetTicket(TicketId),
    Audits(TicketId),
    SideConversations(TicketId),
    SetField(TicketId),
    Comment(TicketId),
    /// Keyed by the merge source.
    Merge(TicketId),
    GetUser(UserId),
    MergeUser(UserId),
}

/// A write the desk accepted, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeskWrite {
    Merge {
        source: TicketId,
        target: TicketId,
    },
    SetField {
        ticket: TicketId,
        field_id: u64,
        value: serde_json::Value,
    },
    Comment {
        ticket: TicketId,
        body: String,
        public: bool,
    },
    MergeUser {
        source: UserId,
        target: UserId,
    },
}

#[derive(Default)]
struct DeskState {
    tickets: BTreeMap<TicketId, Ticket>,
    views: HashMap<u64, Vec<TicketId>>,
    audits: HashMap<TicketId, Vec<AuditEvent>>,
    side_conversations: HashMap<TicketId, Vec<SideConversation>>,
    users: BTreeMap<UserId, User>,
    identities: HashMap<UserId, Vec<UserIdentity>>,
    org_domains: HashMap<u64, BTreeSet<String>>,
    failpoints: HashSet<Failpoint>,
    writes: Vec<DeskWrite>,
    calls: HashMap<&'static str, usize>,
    next_audit_id: u64,
}

impl DeskState {
    fn call(&mut self, name: &'static str) {
        *self.calls.entry(name).or_default() += 1;
    }

    fn check(&self, failpoint: Failpoint) -> Result<()> {
        if self.failpoints.contains(&failpoint) {
            Err(Error::api(500, format!("injected failure: {failpoint:?}")))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
pub struct InMemoryDesk {
    state: Mutex<DeskState>,
}

impl InMemoryDesk {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DeskState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_ticket(&self, ticket: Ticket) {
        self.state().tickets.insert(ticket.id, ticket);
    }

    /// Put tickets into a saved view, in order.
    pub fn add_to_view(&self, view_id: u64, ids: &[u64]) {
        self.state()
            .views
            .entry(view_id)
            .or_default()
            .extend(ids.iter().copied().map(TicketId));
    }

    pub fn add_audit(&self, ticket: u64, event: AuditEvent) {
        self.state()
            .audits
            .entry(TicketId(ticket))
            .or_default()
            .push(event);
    }

    pub fn add_side_conversation(&self, parent: u64, conversation: SideConversation) {
        self.state()
            .side_conversations
            .entry(TicketId(parent))
            .or_default()
            .push(conversation);
    }

    pub fn add_user(&self, user: User) {
        self.state().users.insert(user.id, user);
    }

    pub fn add_identity(&self, user: u64, identity: UserIdentity) {
        self.state()
            .identities
            .entry(UserId(user))
            .or_default()
            .push(identity);
    }

    pub fn add_organization(&self, org_id: u64, domains: &[&str]) {
        self.state()
            .org_domains
            .insert(org_id, domains.iter().map(|d| d.to_lowercase()).collect());
    }

    pub fn fail(&self, failpoint: Failpoint) {
        self.state().failpoints.insert(failpoint);
    }

    pub fn heal(&self, failpoint: &Failpoint) {
        self.state().failpoints.remove(failpoint);
    }

    pub fn writes(&self) -> Vec<DeskWrite> {
        self.state().writes.clone()
    }

    pub fn ticket(&self, id: u64) -> Option<Ticket> {
        self.state().tickets.get(&TicketId(id)).cloned()
    }

    /// How many times a trait method was invoked.
    pub fn calls(&self, name: &str) -> usize {
        self.state().calls.get(name).copied().unwrap_or(0)
    }
}

fn matches_filter(ticket: &Ticket, filter: &TicketFilter) -> bool {
    match filter {
        TicketFilter::CreatedSince(since) => ticket.created_at >= *since,
        TicketFilter::View(_) => true,
        TicketFilter::Query(q) => {
            q.status.is_none_or(|s| s.matches(ticket.status))
                && q.created_after.is_none_or(|at| ticket.created_at > at)
                // no solved_at on the record; updated_at stands in for it
                && q.solved_after.is_none_or(|at| ticket.updated_at > at)
                && q
                    .channel
                    .as_deref()
                    .is_none_or(|c| ticket.channel() == c.to_lowercase())
        }
    }
}

#[async_trait]
impl TicketSource for InMemoryDesk {
    async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>> {
        let mut state = self.state();
        state.call("list_tickets");
        state.check(Failpoint::ListTickets)?;
        if let TicketFilter::View(view_id) = filter {
            let ids = state.views.get(view_id).cloned().unwrap_or_default();
            return Ok(ids
                .iter()
                .filter_map(|id| state.tickets.get(id).cloned())
                .collect());
        }
        Ok(state
            .tickets
            .values()
            .filter(|t| matches_filter(t, filter))
            .cloned()
            .collect())
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        let mut state = self.state();
        state.call("get_ticket");
        state.check(Failpoint::GetTicket(id))?;
        Ok(state.tickets.get(&id).cloned())
    }

    async fn get_ticket_audits(&self, id: TicketId) -> Result<Vec<AuditEvent>> {
        let mut state = self.state();
        state.call("get_ticket_audits");
        state.check(Failpoint::Audits(id))?;
        Ok(state.audits.get(&id).cloned().unwrap_or_default())
    }

    async fn list_side_conversations(&self, id: TicketId) -> Result<Vec<SideConversation>> {
        let mut state = self.state();
        state.call("list_side_conversations");
        state.check(Failpoint::SideConversations(id))?;
        Ok(state.side_conversations.get(&id).cloned().unwrap_or_default())
    }

    async fn set_custom_field(
        &self,
        id: TicketId,
        field_id: u64,
        value: &serde_json::Value,
    ) -> Result<()> {
        let mut state = self.state();
        state.call("set_custom_field");
        state.check(Failpoint::SetField(id))?;
        let ticket = state
            .tickets
            .get_mut(&id)
            .ok_or_else(|| Error::api(404, format!("ticket {id} not found")))?;
        ticket.custom_fields.retain(|f| f.id != field_id);
        ticket.custom_fields.push(CustomFieldEntry {
            id: field_id,
            value: Some(value.clone()),
        });
        ticket.updated_at = Utc::now();
        state.writes.push(DeskWrite::SetField {
            ticket: id,
            field_id,
            value: value.clone(),
        });
        Ok(())
    }

    async fn post_comment(&self, id: TicketId, body: &str, public: bool) -> Result<()> {
        let mut state = self.state();
        state.call("post_comment");
        state.check(Failpoint::Comment(id))?;
        if !state.tickets.contains_key(&id) {
            return Err(Error::api(404, format!("ticket {id} not found")));
        }
        state.next_audit_id += 1;
        let audit_id = state.next_audit_id;
        state.audits.entry(id).or_default().push(AuditEvent {
            audit_id,
            kind: "Comment".to_string(),
            via: None,
            public: Some(public),
            body: Some(body.to_string()),
            author_id: None,
            created_at: Utc::now(),
        });
        state.writes.push(DeskWrite::Comment {
            ticket: id,
            body: body.to_string(),
            public,
        });
        Ok(())
    }

    async fn merge(&self, source: TicketId, target: TicketId) -> Result<()> {
        let mut state = self.state();
        state.call("merge");
        state.check(Failpoint::Merge(source))?;
        match state.tickets.get(&target).map(|t| t.status) {
            None => return Err(Error::api(404, format!("ticket {target} not found"))),
            Some(status) if status.blocks_merge() => {
                return Err(Error::api(422, format!("target {target} is {status}")));
            }
            Some(_) => {}
        }
        let source_ticket = state
            .tickets
            .get_mut(&source)
            .ok_or_else(|| Error::api(404, format!("ticket {source} not found")))?;
        if source_ticket.status.blocks_merge() {
            // already folded in by an earlier run
            return Ok(());
        }
        source_ticket.status = TicketStatus::Closed;
        source_ticket.updated_at = Utc::now();
        state.writes.push(DeskWrite::Merge { source, target });
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryDesk {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let mut state = self.state();
        state.call("get_user");
        state.check(Failpoint::GetUser(id))?;
        Ok(state.users.get(&id).cloned())
    }

    async fn get_users_many(&self, ids: &[UserId]) -> Result<Vec<User>> {
        let mut state = self.state();
        state.call("get_users_many");
        Ok(ids
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect())
    }

    async fn get_user_identities(&self, id: UserId) -> Result<Vec<UserIdentity>> {
        let mut state = self.state();
        state.call("get_user_identities");
        Ok(state.identities.get(&id).cloned().unwrap_or_default())
    }

    async fn search_users(&self, term: &str) -> Result<Vec<User>> {
        let mut state = self.state();
        state.call("search_users");
        let needle = term.trim().to_lowercase();
        let digits: String = needle.chars().filter(|c| c.is_ascii_digit()).collect();
        Ok(state
            .users
            .values()
            .filter(|u| {
                let email_hit = u
                    .email
                    .as_deref()
                    .is_some_and(|e| e.trim().to_lowercase() == needle);
                let phone_hit = !digits.is_empty()
                    && u.phone.as_deref().is_some_and(|p| {
                        p.chars()
                            .filter(|c| c.is_ascii_digit())
                            .collect::<String>()
                            .ends_with(&digits[digits.len().saturating_sub(9)..])
                    });
                email_hit || phone_hit
            })
            .cloned()
            .collect())
    }

    async fn merge_users(&self, source: UserId, target: UserId) -> Result<()> {
        let mut state = self.state();
        state.call("merge_users");
        state.check(Failpoint::MergeUser(source))?;
        if !state.users.contains_key(&target) {
            return Err(Error::api(404, format!("user {target} not found")));
        }
        if state.users.remove(&source).is_some() {
            state.writes.push(DeskWrite::MergeUser { source, target });
        }
        Ok(())
    }

    async fn get_organization_domains(&self, org_id: u64) -> Result<BTreeSet<String>> {
        let mut state = self.state();
        state.call("get_organization_domains");
        Ok(state.org_domains.get(&org_id).cloned().unwrap_or_default())
    }
}
