//! Applies merge and propagation decisions through the helpdesk.
//!
//! Every call ends in exactly one recorded [`Outcome`]. A failed write is
//! logged and recorded, and the caller moves on to the next item. Writes are
//! counted against a per-run cap; once it is spent the remaining writes are
//! reported as deferred rather than attempted.

use serde_json::Value;
use tracing::info;

use crate::adapter::{TicketSource, UserDirectory};
use crate::error::Result;
use crate::model::{Action, Outcome, RunResult, SkipReason, Ticket, TicketId, UserId};
use crate::telemetry::run::record_item_outcome;

pub struct Executor<'a, S: ?Sized> {
    desk: &'a S,
    dry_run: bool,
    max_actions: usize,
    spent: usize,
    result: RunResult,
}

impl<'a, S: ?Sized> Executor<'a, S> {
    pub fn new(desk: &'a S, pass: &str, dry_run: bool, max_actions: usize) -> Self {
        Self {
            desk,
            dry_run,
            max_actions,
            spent: 0,
            result: RunResult::new(pass, dry_run),
        }
    }

    pub fn result(&self) -> &RunResult {
        &self.result
    }

    pub fn result_mut(&mut self) -> &mut RunResult {
        &mut self.result
    }

    pub fn finish(self) -> RunResult {
        self.result
    }

    /// Writes still allowed this run.
    pub fn remaining(&self) -> usize {
        self.max_actions.saturating_sub(self.spent)
    }

    pub fn skip(&mut self, item: u64, reason: SkipReason) -> Outcome {
        self.record(item, Outcome::Skipped { reason })
    }

    /// Record a failure that happened before any write was attempted.
    pub fn fail(&mut self, item: u64, action: Option<Action>, error: impl std::fmt::Display) -> Outcome {
        self.record(
            item,
            Outcome::Failure {
                action,
                error: error.to_string(),
            },
        )
    }

    fn record(&mut self, item: u64, outcome: Outcome) -> Outcome {
        record_item_outcome(&self.result.pass, item, &outcome);
        self.result.record(item, outcome.clone());
        outcome
    }

    /// Spend one slot of the action cap and run `write`, unless dry-run.
    async fn perform<F, Fut>(&mut self, item: u64, action: Action, write: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        if self.spent >= self.max_actions {
            return self.record(item, Outcome::Deferred { action });
        }
        self.spent += 1;

        if self.dry_run {
            info!(%action, "dry run: write not sent");
            return self.record(item, Outcome::Success { action });
        }

        match write().await {
            Ok(()) => self.record(item, Outcome::Success { action }),
            Err(e) => self.record(
                item,
                Outcome::Failure {
                    action: Some(action),
                    error: e.to_string(),
                },
            ),
        }
    }
}

impl<'a, S> Executor<'a, S>
where
    S: TicketSource + ?Sized,
{
    /// Fold `source` into `target`.
    pub async fn execute_merge(&mut self, source: TicketId, target: TicketId) -> Outcome {
        let desk = self.desk;
        self.perform(source.0, Action::MergeTicket { source, target }, || {
            desk.merge(source, target)
        })
        .await
    }

    /// Write the parent's `value` onto `child`. A child that already holds
    /// the value is left untouched.
    pub async fn execute_field_copy(&mut self, child: &Ticket, field_id: u64, value: &Value) -> Outcome {
        if self.desk.get_custom_field(child, field_id) == Some(value) {
            return self.skip(child.id.0, SkipReason::Unchanged);
        }
        let desk = self.desk;
        let id = child.id;
        self.perform(id.0, Action::CopyField { child: id, field_id }, || {
            desk.set_custom_field(id, field_id, value)
        })
        .await
    }

    /// Post `note_text` as an internal comment on `target`, unless an
    /// identical private comment is already there.
    pub async fn execute_missing_value_notice(&mut self, target: TicketId, note_text: &str) -> Outcome {
        let action = Action::Notice { ticket: target };
        let audits = match self.desk.get_ticket_audits(target).await {
            Ok(audits) => audits,
            Err(e) => return self.fail(target.0, Some(action), e),
        };
        let already_posted = audits
            .iter()
            .any(|a| a.is_private_comment() && a.body.as_deref().map(str::trim) == Some(note_text.trim()));
        if already_posted {
            return self.skip(target.0, SkipReason::Unchanged);
        }

        let desk = self.desk;
        self.perform(target.0, action, || desk.post_comment(target, note_text, false))
            .await
    }
}

impl<'a, S> Executor<'a, S>
where
    S: UserDirectory + ?Sized,
{
    /// Fold user `source` into `target`.
    pub async fn execute_user_merge(&mut self, source: UserId, target: UserId) -> Outcome {
        let desk = self.desk;
        self.perform(source.0, Action::MergeUser { source, target }, || {
            desk.merge_users(source, target)
        })
        .await
    }
}
