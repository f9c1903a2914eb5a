//! Escalation-reason propagation pass.
//!
//! For every child ticket in a view: resolve its parent, then either copy the
//! parent's field value onto the child or, when the parent has no value,
//! leave an internal note saying so.

use serde_json::Value;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{Instrument, debug, info, warn};

use super::{Engine, finish_pass};
use crate::adapter::{TicketFilter, TicketSource, UserDirectory};
use crate::config::policy::{NoticeTarget, PropagationPolicy};
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::model::{RunResult, SkipReason, Ticket, TicketId, UserId};
use crate::resolver::{ParentResolver, Resolution};
use crate::telemetry::run::start_pass_span;

pub const PROPAGATION_PASS: &str = "propagate_field";

/// What to do for one child, decided before any write.
enum Step {
    NoParent(TicketId),
    Failed(TicketId, String),
    Copy { child: Ticket, value: Value },
    Notice { target: TicketId, text: String },
    /// Same note on the same ticket as an earlier child in this batch.
    DuplicateNotice(TicketId),
}

/// Internal note left when the parent has nothing to propagate.
pub fn missing_value_note(parent: TicketId, assignee: &str, requester: &str) -> String {
    format!(
        "Escalation reason missing in parent ticket {parent}. \
         Assignee in parent: {assignee}. Child requester: {requester}."
    )
}

impl<S> Engine<S>
where
    S: TicketSource + UserDirectory,
{
    /// Propagate `policy.field_id` from parents to the children listed in
    /// `view`.
    ///
    /// A missing field id or view, a failed view fetch and an empty view
    /// abort the pass before any write.
    pub async fn run_field_propagation_pass(
        &self,
        view: u64,
        policy: &PropagationPolicy,
    ) -> Result<RunResult> {
        let field_id = policy
            .field_id
            .filter(|id| *id != 0)
            .ok_or_else(|| Error::Config("propagation needs a field id".to_string()))?;
        if view == 0 {
            return Err(Error::Config("propagation needs a view id".to_string()));
        }

        let mut ctx = RunContext::new();
        let span = start_pass_span(PROPAGATION_PASS, &ctx.run_id, self.config.dry_run);
        let started = Instant::now();

        let result = async {
            let mut children = self.desk.list_tickets(&TicketFilter::View(view)).await?;
            let mut seen = HashSet::new();
            children.retain(|t| seen.insert(t.id));
            if children.is_empty() {
                return Err(Error::EmptyBatch(format!("view {view} is empty")));
            }
            span.record("pass.examined", children.len() as u64);
            info!(view, field_id, children = children.len(), "propagation batch fetched");

            let resolver = ParentResolver::new(
                self.desk.as_ref(),
                self.now(),
                policy.reverse_search_days,
                policy.reverse_match,
            );

            let mut steps = Vec::with_capacity(children.len());
            let mut notices = HashSet::new();
            for child in &children {
                let step = self
                    .decide(&mut ctx, &resolver, child, field_id, policy.notice_target)
                    .await;
                // A note is posted at most once per ticket per batch; the
                // audit check at execution only guards against earlier runs.
                let step = match step {
                    Step::Notice { target, text } if !notices.insert((target, text.clone())) => {
                        Step::DuplicateNotice(child.id)
                    }
                    other => other,
                };
                steps.push(step);
            }

            let mut executor = Executor::new(
                self.desk.as_ref(),
                PROPAGATION_PASS,
                self.config.dry_run,
                self.config.max_actions,
            );
            executor.result_mut().examined = children.len();

            for step in steps {
                match step {
                    Step::NoParent(child) => {
                        executor.skip(child.0, SkipReason::NoParent);
                    }
                    Step::Failed(child, error) => {
                        executor.fail(child.0, None, error);
                    }
                    Step::Copy { child, value } => {
                        executor.execute_field_copy(&child, field_id, &value).await;
                    }
                    Step::Notice { target, text } => {
                        executor.execute_missing_value_notice(target, &text).await;
                    }
                    Step::DuplicateNotice(child) => {
                        executor.skip(child.0, SkipReason::Unchanged);
                    }
                }
            }

            Ok::<_, Error>(executor.finish())
        }
        .instrument(span.clone())
        .await?;

        finish_pass(&result, started);
        Ok(result)
    }

    async fn decide(
        &self,
        ctx: &mut RunContext,
        resolver: &ParentResolver<'_, S>,
        child: &Ticket,
        field_id: u64,
        notice_target: NoticeTarget,
    ) -> Step {
        let parent_id = match resolver.resolve(ctx, child).await {
            Resolution::Found { parent, .. } => parent,
            Resolution::NotFound => return Step::NoParent(child.id),
        };

        let parent = match self.parent_ticket(ctx, parent_id).await {
            Ok(Some(parent)) => parent,
            Ok(None) => {
                return Step::Failed(child.id, format!("parent ticket {parent_id} not found"));
            }
            Err(e) => {
                return Step::Failed(child.id, format!("parent ticket {parent_id}: {e}"));
            }
        };

        if let Some(value) = self.desk.get_custom_field(&parent, field_id) {
            debug!(child = %child.id, parent = %parent_id, "parent holds a value");
            return Step::Copy {
                child: child.clone(),
                value: value.clone(),
            };
        }

        let assignee = match parent.assignee_id {
            Some(id) => self.user_name(ctx, id).await,
            None => "unassigned".to_string(),
        };
        let requester = self.user_name(ctx, child.requester_id).await;
        let target = match notice_target {
            NoticeTarget::Child => child.id,
            NoticeTarget::Parent => parent_id,
        };
        Step::Notice {
            target,
            text: missing_value_note(parent_id, &assignee, &requester),
        }
    }

    /// Fetch a parent once per run.
    async fn parent_ticket(&self, ctx: &mut RunContext, id: TicketId) -> Result<Option<Ticket>> {
        if let Some(cached) = ctx.parent_tickets.get(&id) {
            return Ok(cached.clone());
        }
        let ticket = self.desk.get_ticket(id).await?;
        ctx.parent_tickets.insert(id, ticket.clone());
        Ok(ticket)
    }

    /// Display name for a user, `ID:<n>` when it cannot be looked up.
    async fn user_name(&self, ctx: &mut RunContext, id: UserId) -> String {
        if let Some(name) = ctx.user_names.get(&id) {
            return name.clone();
        }
        let name = match self.desk.get_user(id).await {
            Ok(Some(user)) if !user.name.trim().is_empty() => user.name.trim().to_string(),
            Ok(_) => format!("ID:{id}"),
            Err(e) => {
                warn!(user = %id, error = %e, "name lookup failed");
                format!("ID:{id}")
            }
        };
        ctx.user_names.insert(id, name.clone());
        name
    }
}
