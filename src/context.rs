//! Per-run state: caches that bound API calls within one pass.
//!
//! A `RunContext` is created at the start of a pass and dropped at the end.
//! Nothing here outlives the run, so a new run always sees fresh platform state.

use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::model::{Ticket, TicketId, UserId};
use crate::resolver::Resolution;

#[derive(Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    /// child -> resolution. Authoritative for the rest of the run.
    pub(crate) parents: HashMap<TicketId, Resolution>,
    /// Reverse-search index (child -> parent), built on first use.
    pub(crate) reverse_index: Option<HashMap<TicketId, TicketId>>,
    /// Parent tickets already fetched; `None` = fetched and missing.
    pub(crate) parent_tickets: HashMap<TicketId, Option<Ticket>>,
    /// requester -> organisation domains; `None` = lookup failed this run.
    pub(crate) requester_domains: HashMap<UserId, Option<BTreeSet<String>>>,
    /// user -> display name, or `ID:<n>` when the lookup failed.
    pub(crate) user_names: HashMap<UserId, String>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            parents: HashMap::new(),
            reverse_index: None,
            parent_tickets: HashMap::new(),
            requester_domains: HashMap::new(),
            user_names: HashMap::new(),
        }
    }

    /// The resolution recorded for a child earlier in this run.
    pub fn cached_resolution(&self, child: TicketId) -> Option<Resolution> {
        self.parents.get(&child).copied()
    }

    pub fn reverse_index_built(&self) -> bool {
        self.reverse_index.is_some()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
