//! Duplicate-ticket merge pass.

use std::time::Instant;
use tracing::{Instrument, info};

use super::{Engine, finish_pass};
use crate::adapter::{TicketFilter, TicketSource, UserDirectory};
use crate::cluster::{ClusterDecision, ClusteringEngine, ExclusionPolicy, SubjectNormalizer};
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::model::{RunResult, SkipReason};
use crate::telemetry::run::start_pass_span;

pub const MERGE_PASS: &str = "merge_tickets";

impl<S> Engine<S>
where
    S: TicketSource + UserDirectory,
{
    /// Fetch tickets matching `filter`, cluster duplicates and fold every
    /// non-survivor into its cluster's survivor.
    ///
    /// Returns `Err` only when the batch cannot be fetched or is empty.
    pub async fn run_merge_pass(
        &self,
        filter: &TicketFilter,
        exclusions: &ExclusionPolicy,
        normalizer: SubjectNormalizer,
    ) -> Result<RunResult> {
        let mut ctx = RunContext::new();
        let span = start_pass_span(MERGE_PASS, &ctx.run_id, self.config.dry_run);
        let started = Instant::now();

        let result = async {
            let tickets = self.desk.list_tickets(filter).await?;
            if tickets.is_empty() {
                return Err(Error::EmptyBatch(format!("no tickets match {filter:?}")));
            }
            span.record("pass.examined", tickets.len() as u64);
            info!(tickets = tickets.len(), "merge batch fetched");

            let mut executor = Executor::new(
                self.desk.as_ref(),
                MERGE_PASS,
                self.config.dry_run,
                self.config.max_actions,
            );
            executor.result_mut().examined = tickets.len();

            let plan = ClusteringEngine::new(self.desk.as_ref(), normalizer)
                .cluster(&mut ctx, tickets, exclusions)
                .await;
            for (id, rule) in plan.excluded {
                executor.skip(id.0, SkipReason::Excluded { rule });
            }
            for (id, error) in plan.unverified {
                executor.fail(id.0, None, error);
            }

            let decisions: Vec<_> = plan
                .clusters
                .iter()
                .map(|c| (c.key.clone(), c.member_ids(), c.decision()))
                .collect();
            for (key, members, decision) in decisions {
                match decision {
                    ClusterDecision::Single => {}
                    ClusterDecision::Vetoed { survivor, status } => {
                        info!(%key, %survivor, %status, "cluster skipped");
                        for member in members.into_iter().filter(|m| *m != survivor) {
                            executor.skip(member.0, SkipReason::SurvivorVetoed { survivor, status });
                        }
                    }
                    ClusterDecision::Merge { target, sources } => {
                        info!(%key, %target, sources = sources.len(), "merging cluster");
                        for source in sources {
                            executor.execute_merge(source, target).await;
                        }
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
}
