//! Duplicate end-user merge pass.

use chrono::Duration;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{Instrument, debug, info};

use super::{Engine, finish_pass};
use crate::adapter::{StatusFilter, TicketFilter, TicketQuery, TicketSource, UserDirectory};
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::identity::{IdentityMatcher, candidates, plan_merges};
use crate::model::{RunResult, TicketStatus, UserId};
use crate::telemetry::run::start_pass_span;

pub const USER_MERGE_PASS: &str = "merge_users";

impl<S> Engine<S>
where
    S: TicketSource + UserDirectory,
{
    /// Find requesters of tickets solved in the last `window_minutes`,
    /// match them to duplicate end-user profiles by email and phone, and
    /// merge each group into its strongest profile.
    pub async fn run_user_merge_pass(&self, window_minutes: u32) -> Result<RunResult> {
        let ctx = RunContext::new();
        let span = start_pass_span(USER_MERGE_PASS, &ctx.run_id, self.config.dry_run);
        let started = Instant::now();
        let since = self.now() - Duration::minutes(i64::from(window_minutes));

        let result = async {
            let query = TicketQuery {
                status: Some(StatusFilter::Is(TicketStatus::Solved)),
                solved_after: Some(since),
                ..TicketQuery::default()
            };
            let solved = self.desk.list_tickets(&TicketFilter::Query(query)).await?;
            if solved.is_empty() {
                return Err(Error::EmptyBatch(format!(
                    "no tickets solved in the last {window_minutes} minutes"
                )));
            }

            let mut counts: HashMap<UserId, usize> = HashMap::new();
            for ticket in &solved {
                *counts.entry(ticket.requester_id).or_default() += 1;
            }
            let mut ids: Vec<UserId> = counts.keys().copied().collect();
            ids.sort();
            let requesters = self.desk.get_users_many(&ids).await?;
            span.record("pass.examined", requesters.len() as u64);
            info!(solved = solved.len(), requesters = requesters.len(), "user batch fetched");

            let mut executor = Executor::new(
                self.desk.as_ref(),
                USER_MERGE_PASS,
                self.config.dry_run,
                self.config.max_actions,
            );
            executor.result_mut().examined = requesters.len();

            let matcher = IdentityMatcher::new(self.desk.as_ref());
            let mut covered = HashSet::new();
            let mut groups = Vec::new();
            for requester in &requesters {
                if !requester.is_end_user() {
                    debug!(user = %requester.id, "not an end user");
                    continue;
                }
                if covered.contains(&requester.id) {
                    continue;
                }
                match matcher.duplicates_of(requester).await {
                    Ok(users) if users.len() > 1 => {
                        covered.extend(users.iter().map(|u| u.id));
                        groups.push(candidates(users, &counts));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        executor.fail(requester.id.0, None, e);
                    }
                }
            }

            let pairs = plan_merges(&groups);
            info!(groups = groups.len(), merges = pairs.len(), "duplicate users planned");
            for (source, target) in pairs {
                executor.execute_user_merge(source, target).await;
            }

            Ok::<_, Error>(executor.finish())
        }
        .instrument(span.clone())
        .await?;

        finish_pass(&result, started);
        Ok(result)
    }
}
