//! Span helpers for ingress and daemon work.

use tracing::Span;
use uuid::Uuid;

/// Span wrapping one trigger's trip through the ingress pipeline.
///
/// `event.type`, `event.id` and `event.outcome` start empty; fill them with
/// [`record_outcome`] and `span.record`.
pub fn start_ingress_span(workflow_id: &Uuid, event_template_id: &Uuid, attempt: u32) -> Span {
    tracing::info_span!(
        "event.ingress",
        "workflow.id" = %workflow_id,
        "event.template_id" = %event_template_id,
        "event.attempt" = attempt,
        "event.type" = tracing::field::Empty,
        "event.id" = tracing::field::Empty,
        "event.outcome" = tracing::field::Empty,
    )
}

/// Span wrapping one daemon pass for a given event type.
pub fn start_tick_span(pass: &str, token: &Uuid) -> Span {
    tracing::info_span!(
        "daemon.tick",
        "daemon.pass" = pass,
        "claim.token" = %token,
        "claim.count" = tracing::field::Empty,
    )
}

/// Record the final outcome on an ingress span and emit an event for it.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("event.outcome", outcome);
    span.in_scope(|| {
        tracing::info!(outcome, "ingress outcome");
    });
}
