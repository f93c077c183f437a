//! Integration tests for telemetry initialization and span helpers.

use uuid::Uuid;
use workflow_events::telemetry::event::{record_outcome, start_ingress_span, start_tick_span};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // Using try_init() in the implementation avoids panics if another
    // test already initialized a subscriber.
    let config = workflow_events::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "wfevents-test".to_string(),
        log_level: "debug".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = workflow_events::telemetry::init_telemetry(config);
}

#[test]
fn ingress_span_creates_and_records_outcome() {
    let span = start_ingress_span(&Uuid::new_v4(), &Uuid::new_v4(), 1);
    span.record("event.type", "notification");
    record_outcome(&span, "deferred");
}

#[test]
fn tick_span_creates_and_records_count() {
    let span = start_tick_span("delay", &Uuid::new_v4());
    span.record("claim.count", 3);
}

#[test]
fn metric_instruments_are_available() {
    use opentelemetry::KeyValue;
    use workflow_events::telemetry::metrics;

    metrics::events_ingested().add(1, &[KeyValue::new("outcome", "completed")]);
    metrics::tick_duration_ms().record(12.5, &[KeyValue::new("pass", "delay")]);
}
