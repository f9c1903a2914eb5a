//! Parent resolution for side-conversation child tickets.
//!
//! Strategies run in confidence order and the first hit wins:
//! 1. the child's own via descriptor,
//! 2. the via recorded on its creation audit,
//! 3. a reverse search over recent tickets' side conversations.
//!
//! A strategy whose adapter call fails counts as a miss. Results are cached
//! in the [`RunContext`] so each child is resolved at most once per run.

use chrono::{DateTime, Duration, Utc};
use opentelemetry::KeyValue;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::adapter::{TicketFilter, TicketSource};
use crate::context::RunContext;
use crate::model::{Ticket, TicketId};
use crate::telemetry::metrics;

/// Which reverse-search candidate wins when several parents claim one child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverseMatch {
    /// The parent created first.
    #[default]
    Earliest,
    /// The parent created last.
    Latest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Via,
    Audit,
    ReverseSearch,
}

impl Strategy {
    pub fn label(self) -> &'static str {
        match self {
            Strategy::Via => "via",
            Strategy::Audit => "audit",
            Strategy::ReverseSearch => "reverse_search",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Found { parent: TicketId, strategy: Strategy },
    NotFound,
}

impl Resolution {
    pub fn parent(self) -> Option<TicketId> {
        match self {
            Resolution::Found { parent, .. } => Some(parent),
            Resolution::NotFound => None,
        }
    }
}

pub struct ParentResolver<'a, S: ?Sized> {
    source: &'a S,
    reverse_search_from: DateTime<Utc>,
    reverse_match: ReverseMatch,
}

impl<'a, S> ParentResolver<'a, S>
where
    S: TicketSource + ?Sized,
{
    /// `reverse_search_days` bounds how far back the fallback scan reaches,
    /// measured from `now`.
    pub fn new(
        source: &'a S,
        now: DateTime<Utc>,
        reverse_search_days: u32,
        reverse_match: ReverseMatch,
    ) -> Self {
        Self {
            source,
            reverse_search_from: now - Duration::days(i64::from(reverse_search_days)),
            reverse_match,
        }
    }

    /// Resolve the parent of `child`, or `None`.
    pub async fn resolve_parent(&self, ctx: &mut RunContext, child: &Ticket) -> Option<TicketId> {
        self.resolve(ctx, child).await.parent()
    }

    /// Resolve by id, fetching the child first. A failed fetch is a miss.
    pub async fn resolve_parent_of(&self, ctx: &mut RunContext, child: TicketId) -> Resolution {
        if let Some(cached) = ctx.parents.get(&child) {
            return *cached;
        }
        match self.source.get_ticket(child).await {
            Ok(Some(ticket)) => self.resolve(ctx, &ticket).await,
            Ok(None) => {
                warn!(%child, "child ticket not found");
                Resolution::NotFound
            }
            Err(e) => {
                warn!(%child, error = %e, "could not fetch child ticket");
                Resolution::NotFound
            }
        }
    }

    /// Run the strategy chain, consulting and filling the run cache.
    pub async fn resolve(&self, ctx: &mut RunContext, child: &Ticket) -> Resolution {
        if let Some(cached) = ctx.parents.get(&child.id) {
            return *cached;
        }

        let resolution = match self.from_via(child) {
            Some(parent) => Resolution::Found {
                parent,
                strategy: Strategy::Via,
            },
            None => match self.from_audits(child.id).await {
                Some(parent) => Resolution::Found {
                    parent,
                    strategy: Strategy::Audit,
                },
                None => match self.from_reverse_search(ctx, child.id).await {
                    Some(parent) => Resolution::Found {
                        parent,
                        strategy: Strategy::ReverseSearch,
                    },
                    None => Resolution::NotFound,
                },
            },
        };

        let strategy = match resolution {
            Resolution::Found { parent, strategy } => {
                info!(child = %child.id, %parent, strategy = strategy.label(), "parent resolved");
                strategy.label()
            }
            Resolution::NotFound => {
                info!(child = %child.id, "no parent found");
                "none"
            }
        };
        metrics::resolutions().add(1, &[KeyValue::new("strategy", strategy)]);

        ctx.parents.insert(child.id, resolution);
        resolution
    }

    fn from_via(&self, child: &Ticket) -> Option<TicketId> {
        let parent = child.via.as_ref()?.side_conversation_source()?;
        reject_self(child.id, parent)
    }

    async fn from_audits(&self, child: TicketId) -> Option<TicketId> {
        let events = match self.source.get_ticket_audits(child).await {
            Ok(events) => events,
            Err(e) => {
                warn!(%child, error = %e, "audit scan skipped");
                return None;
            }
        };
        events
            .iter()
            .filter(|e| e.is_creation())
            .filter_map(|e| e.via.as_ref()?.side_conversation_source())
            .find_map(|parent| reject_self(child, parent))
    }

    async fn from_reverse_search(&self, ctx: &mut RunContext, child: TicketId) -> Option<TicketId> {
        if ctx.reverse_index.is_none() {
            ctx.reverse_index = Some(self.build_reverse_index().await);
        }
        let parent = ctx.reverse_index.as_ref()?.get(&child).copied()?;
        reject_self(child, parent)
    }

    /// Scan recent tickets once and index every side conversation that
    /// spawned a ticket.
    async fn build_reverse_index(&self) -> HashMap<TicketId, TicketId> {
        let mut index = HashMap::new();
        let filter = TicketFilter::CreatedSince(self.reverse_search_from);
        let mut candidates = match self.source.list_tickets(&filter).await {
            Ok(tickets) => tickets,
            Err(e) => {
                warn!(error = %e, "reverse search unavailable for this run");
                return index;
            }
        };

        candidates.sort_by_key(|t| (t.created_at, t.id));
        if self.reverse_match == ReverseMatch::Latest {
            candidates.reverse();
        }

        for parent in &candidates {
            let conversations = match self.source.list_side_conversations(parent.id).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(parent = %parent.id, error = %e, "side conversations skipped");
                    continue;
                }
            };
            for target in conversations.iter().filter_map(|c| c.target_ticket_id) {
                if target == parent.id {
                    continue;
                }
                let kept = *index.entry(target).or_insert(parent.id);
                if kept != parent.id {
                    debug!(child = %target, %kept, ignored = %parent.id, "ambiguous parent");
                }
            }
        }

        info!(
            scanned = candidates.len(),
            indexed = index.len(),
            "reverse search index built"
        );
        index
    }
}

fn reject_self(child: TicketId, parent: TicketId) -> Option<TicketId> {
    if parent == child {
        warn!(%child, "ignoring self-referencing parent link");
        None
    } else {
        Some(parent)
    }
}
