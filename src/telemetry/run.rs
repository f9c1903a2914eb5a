//! Pass span helpers.
//!
//! Every pass runs inside one `mergebot.pass` span; each item's terminal
//! outcome is emitted as an event in that span and counted.

use opentelemetry::KeyValue;
use tracing::Span;
use uuid::Uuid;

use super::metrics;
use crate::model::Outcome;

/// Start the span for one pass.
///
/// `pass.examined` is declared empty and filled once the batch is fetched.
pub fn start_pass_span(pass: &str, run_id: &Uuid, dry_run: bool) -> Span {
    tracing::info_span!(
        "mergebot.pass",
        "pass.name" = pass,
        "run.id" = %run_id,
        "run.dry_run" = dry_run,
        "pass.examined" = tracing::field::Empty,
    )
}

/// Emit an `item_outcome` event and bump `mergebot.actions`.
pub fn record_item_outcome(pass: &str, item: u64, outcome: &Outcome) {
    let action = match outcome {
        Outcome::Success { action } | Outcome::Deferred { action } => action.label(),
        Outcome::Failure {
            action: Some(action),
            ..
        } => action.label(),
        Outcome::Failure { action: None, .. } | Outcome::Skipped { .. } => "none",
    };

    match outcome {
        Outcome::Failure { error, .. } => {
            tracing::warn!(item, action, outcome = outcome.label(), error = %error, "item_outcome");
        }
        Outcome::Skipped { reason } => {
            tracing::info!(item, action, outcome = outcome.label(), reason = %reason, "item_outcome");
        }
        _ => tracing::info!(item, action, outcome = outcome.label(), "item_outcome"),
    }

    metrics::actions().add(
        1,
        &[
            KeyValue::new("pass", pass.to_string()),
            KeyValue::new("action", action),
            KeyValue::new("outcome", outcome.label()),
        ],
    );
}
