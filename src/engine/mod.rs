//! Pass driver: fetch a batch, decide everything, then execute.
//!
//! Each pass gets a fresh [`RunContext`] and its own `mergebot.pass` span.
//! All decisions for a batch are computed before the first write, so no
//! write in a run can change a decision made in that run.

mod merge;
mod propagation;
mod users;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::adapter::{InMemoryDesk, TicketSource, UserDirectory};
use crate::model::RunResult;
use crate::telemetry::metrics;

/// Knobs shared by every pass.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Log writes instead of sending them.
    pub dry_run: bool,
    /// Upper bound on writes per pass.
    pub max_actions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            max_actions: 50,
        }
    }
}

/// Runs merge, propagation and user-merge passes against one helpdesk.
pub struct Engine<S> {
    desk: Arc<S>,
    config: EngineConfig,
    clock: Option<DateTime<Utc>>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            desk: Arc::clone(&self.desk),
            config: self.config.clone(),
            clock: self.clock,
        }
    }
}

impl Engine<InMemoryDesk> {
    /// Engine over an empty in-memory desk (for testing).
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(InMemoryDesk::new()), config)
    }
}

impl<S> Engine<S>
where
    S: TicketSource + UserDirectory,
{
    pub fn new(desk: Arc<S>, config: EngineConfig) -> Self {
        Self {
            desk,
            config,
            clock: None,
        }
    }

    /// Pin "now" for lookback windows.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.clock = Some(now);
        self
    }

    pub fn desk(&self) -> &S {
        &self.desk
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }
}

/// Log the summary and record the pass duration.
fn finish_pass(result: &RunResult, started: Instant) {
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    metrics::pass_duration_ms().record(elapsed_ms, &[KeyValue::new("pass", result.pass.clone())]);
    info!(duration_ms = elapsed_ms as u64, summary = %result, "pass finished");
}
