//! Integration tests for telemetry initialization and pass span helpers.

use mergebot_rs::model::{Action, Outcome, SkipReason, TicketId};
use mergebot_rs::telemetry::run::{record_item_outcome, start_pass_span};
use mergebot_rs::telemetry::{TelemetryConfig, init_telemetry};
use uuid::Uuid;

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process, so this may
    // return Err when another test got there first; that is acceptable.
    let _guard = init_telemetry(TelemetryConfig::local("debug"));
}

#[test]
fn local_config_has_no_exporter() {
    let config = TelemetryConfig::local("warn");
    assert!(config.endpoint.is_none());
    assert_eq!(config.log_level, "warn");
    assert_eq!(config.service_name, "mergebot");
}

#[test]
fn pass_span_records_examined_count() {
    let span = start_pass_span("merge_tickets", &Uuid::new_v4(), true);
    span.record("pass.examined", 12_u64);
}

#[test]
fn every_outcome_kind_can_be_recorded() {
    let span = start_pass_span("merge_tickets", &Uuid::new_v4(), false);
    let _enter = span.enter();
    let merge = Action::MergeTicket {
        source: TicketId(2),
        target: TicketId(1),
    };

    record_item_outcome("merge_tickets", 2, &Outcome::Success { action: merge.clone() });
    record_item_outcome("merge_tickets", 3, &Outcome::Deferred { action: merge.clone() });
    record_item_outcome(
        "merge_tickets",
        4,
        &Outcome::Failure {
            action: Some(merge),
            error: "422 invalid".to_string(),
        },
    );
    record_item_outcome(
        "merge_tickets",
        5,
        &Outcome::Skipped {
            reason: SkipReason::Unchanged,
        },
    );
}
