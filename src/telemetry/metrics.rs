//! Metric instrument factories for mergebot-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"mergebot-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for mergebot-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("mergebot-rs")
}

/// Counter: terminal item outcomes.
/// Labels: `pass`, `action`, `outcome` ("success" | "failure" | "skipped" | "deferred").
pub fn actions() -> Counter<u64> {
    meter()
        .u64_counter("mergebot.actions")
        .with_description("Item outcomes recorded by a pass")
        .build()
}

/// Counter: parent resolutions.
/// Labels: `strategy` ("via" | "audit" | "reverse_search" | "none").
pub fn resolutions() -> Counter<u64> {
    meter()
        .u64_counter("mergebot.resolutions")
        .with_description("Parent ticket resolutions by winning strategy")
        .build()
}

/// Counter: helpdesk HTTP requests.
/// Labels: `method`, `status`.
pub fn api_requests() -> Counter<u64> {
    meter()
        .u64_counter("mergebot.api.requests")
        .with_description("Helpdesk API requests")
        .build()
}

/// Histogram: pass duration in milliseconds.
/// Labels: `pass`.
pub fn pass_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("mergebot.pass.duration_ms")
        .with_description("Pass duration in milliseconds")
        .with_unit("ms")
        .build()
}
