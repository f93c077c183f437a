//! Metric instruments for the event engine.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`;
//! without one installed these are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("workflow-events")
}

/// Counter: triggers processed by the ingress pipeline.
/// Labels: `type`, `outcome` ("completed" | "deferred" | "requeued" | "soft_failed" | "hard_failed" | "debug").
pub fn events_ingested() -> Counter<u64> {
    meter()
        .u64_counter("wfevents.ingress.processed")
        .with_description("Triggers processed by the ingress pipeline")
        .build()
}

/// Counter: events claimed by this worker.
/// Labels: `type`.
pub fn events_claimed() -> Counter<u64> {
    meter()
        .u64_counter("wfevents.claims.taken")
        .with_description("Due events claimed by this worker")
        .build()
}

/// Counter: stale claims cleared by the reaper.
pub fn claims_reaped() -> Counter<u64> {
    meter()
        .u64_counter("wfevents.claims.reaped")
        .with_description("Stale claims released by the reaper")
        .build()
}

/// Counter: notification delivery attempts.
/// Labels: `result` ("sent" | "postponed" | "exhausted").
pub fn notification_attempts() -> Counter<u64> {
    meter()
        .u64_counter("wfevents.notification.attempts")
        .with_description("Notification delivery attempts")
        .build()
}

/// Counter: triggers put back on the ingress queue by the retry ladder.
pub fn ingress_requeues() -> Counter<u64> {
    meter()
        .u64_counter("wfevents.ingress.requeues")
        .with_description("Triggers requeued by retryIfError")
        .build()
}

/// Counter: recorded workflow failures.
/// Labels: `severity` ("error" | "warning").
pub fn workflow_failures() -> Counter<u64> {
    meter()
        .u64_counter("wfevents.workflow.failures")
        .with_description("WorkflowError records written")
        .build()
}

/// Counter: triggers rejected by the same-template loop guard.
pub fn loop_guard_trips() -> Counter<u64> {
    meter()
        .u64_counter("wfevents.ingress.loop_guard_trips")
        .with_description("Triggers rejected by the loop guard")
        .build()
}

/// Histogram: daemon tick duration.
/// Labels: `pass` ("delay" | "notification").
pub fn tick_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("wfevents.daemon.tick_duration_ms")
        .with_description("Duration of one daemon pass")
        .with_unit("ms")
        .build()
}
