//! The ingress pipeline: one trigger in, one persisted outcome out.
//!
//! Steps, in order:
//! 1. loop guard on the (workflow, template) event count;
//! 2. template load (cached) and settings;
//! 3. workflow snapshot and schema evaluation;
//! 4. dispatch to the type's handler;
//! 5. persistence, completion and status projection, or failure routing.
//!
//! [`IngressPipeline::handle`] never returns an error: every failure ends
//! as a requeue, a soft failure, a hard failure or a debug record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde_json::{Value, json};
use tracing::{Instrument, Span, error, info, warn};
use uuid::Uuid;

use super::alerting::{Failure, FailureReporter};
use super::cache::TemplateCache;
use super::loop_guard::LoopGuard;
use crate::actions::{Dispatcher, HandlerContext, ResultContext};
use crate::config::{RequestLimits, SchedulerConfig};
use crate::error::{Error, Result};
use crate::model::{
    Completion, Event, EventTemplate, NewEvent, RetryEnvelope, SchedulingState,
    TemplateSettings, TriggerMessage, WorkflowDebug, WorkflowSnapshot,
};
use crate::services::evaluator::is_truthy;
use crate::services::{EvalScope, Evaluator, Services};
use crate::store::{EventStore, MessageBus};
use crate::telemetry::event::{record_outcome, start_ingress_span};
use crate::telemetry::metrics;

/// How a trigger left the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum IngressOutcome {
    /// Event stored done; completion emitted unless `onlyExecute`.
    Completed { event_id: Uuid },
    /// Event stored pending for the daemon.
    Deferred {
        event_id: Uuid,
        due_date: Option<DateTime<Utc>>,
    },
    /// Put back on the ingress queue by `retryIfError`.
    Requeued { retry_iterator: u32, delay: Duration },
    /// `notFailOnError`: warning recorded, processing continued.
    SoftFailed { event_id: Option<Uuid> },
    /// Error recorded, workflow flagged, admins alerted.
    HardFailed { cause: String },
    /// Dry run; only a debug row was written.
    Debugged { debug_id: Uuid, failed: bool },
}

impl IngressOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            IngressOutcome::Completed { .. } => "completed",
            IngressOutcome::Deferred { .. } => "deferred",
            IngressOutcome::Requeued { .. } => "requeued",
            IngressOutcome::SoftFailed { .. } => "soft_failed",
            IngressOutcome::HardFailed { .. } => "hard_failed",
            IngressOutcome::Debugged { .. } => "debug",
        }
    }
}

/// What is known about a trigger so far; failure routing reads whatever
/// was reached before the error.
#[derive(Default)]
struct Attempt {
    template: Option<Arc<EventTemplate>>,
    settings: TemplateSettings,
    calculated: Option<Value>,
}

pub struct IngressPipeline {
    store: Arc<dyn EventStore>,
    bus: Arc<dyn MessageBus>,
    evaluator: Arc<dyn Evaluator>,
    dispatcher: Dispatcher,
    templates: TemplateCache,
    guard: LoopGuard,
    failures: FailureReporter,
}

impl IngressPipeline {
    pub fn new(
        store: Arc<dyn EventStore>,
        bus: Arc<dyn MessageBus>,
        services: &Services,
        failures: FailureReporter,
        scheduler: &SchedulerConfig,
        limits: RequestLimits,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(services, Arc::clone(&store), limits),
            templates: TemplateCache::new(Arc::clone(&store), scheduler.template_cache_ttl),
            guard: LoopGuard::new(Arc::clone(&store), scheduler.max_same_template_events),
            evaluator: Arc::clone(&services.evaluator),
            store,
            bus,
            failures,
        }
    }

    pub async fn handle(&self, message: &TriggerMessage) -> IngressOutcome {
        self.handle_at(message, Utc::now()).await
    }

    /// Process one trigger as if received at `now`.
    pub async fn handle_at(&self, message: &TriggerMessage, now: DateTime<Utc>) -> IngressOutcome {
        let span = start_ingress_span(
            &message.workflow_id,
            &message.event_template_id,
            message.attempt(),
        );

        async {
            let mut attempt = Attempt::default();
            let executed = self.execute(message, now, &mut attempt).await;
            let kind = attempt
                .template
                .as_ref()
                .map_or("unknown", |t| t.kind.as_str());
            Span::current().record("event.type", kind);

            let outcome = match (message.debug_id, executed) {
                (Some(debug_id), executed) => {
                    self.record_debug(message, debug_id, &attempt, executed, now)
                        .await
                }
                (None, Ok((snapshot, result))) => {
                    match self.persist(message, &attempt, &snapshot, result).await {
                        Ok(outcome) => outcome,
                        Err(e) => self.route_failure(message, &attempt, e, now).await,
                    }
                }
                (None, Err(e)) => self.route_failure(message, &attempt, e, now).await,
            };

            record_outcome(&Span::current(), outcome.label());
            metrics::events_ingested().add(
                1,
                &[
                    KeyValue::new("type", kind),
                    KeyValue::new("outcome", outcome.label()),
                ],
            );
            outcome
        }
        .instrument(span)
        .await
    }

    /// Steps 1-4.
    async fn execute(
        &self,
        message: &TriggerMessage,
        now: DateTime<Utc>,
        attempt: &mut Attempt,
    ) -> Result<(WorkflowSnapshot, ResultContext)> {
        self.guard.check(message).await?;

        let template = self.templates.get(message.event_template_id).await?;
        attempt.template = Some(Arc::clone(&template));
        attempt.settings = template.settings()?;

        let snapshot = self.store.load_snapshot(message.workflow_id).await?;
        let scope = EvalScope {
            workflow: &snapshot.workflow,
            documents: &snapshot.documents,
            events: &snapshot.events,
        };
        let calculated = self
            .evaluator
            .evaluate(&template.schema, &scope, &Value::Null)
            .await?;
        let calculated = attempt.calculated.insert(calculated);

        let ctx = HandlerContext {
            template: &template,
            settings: &attempt.settings,
            snapshot: &snapshot,
            calculated,
            now,
        };
        let result = self.dispatcher.dispatch(&ctx).await?;
        Ok((snapshot, result))
    }

    /// Step 5, success path.
    async fn persist(
        &self,
        message: &TriggerMessage,
        attempt: &Attempt,
        snapshot: &WorkflowSnapshot,
        result: ResultContext,
    ) -> Result<IngressOutcome> {
        let template = attempt
            .template
            .as_ref()
            .ok_or_else(|| Error::Other("handler ran without a template".to_string()))?;

        let mut scheduling = result.scheduling;
        scheduling.retry_iterator = message.retry_iterator;
        let event = self
            .store
            .insert_event(NewEvent {
                workflow_id: message.workflow_id,
                event_template_id: template.id,
                kind: template.kind,
                name: template.name.clone(),
                done: result.done,
                result: Value::Object(result.result),
                scheduling,
                document_id: result.document_id,
                due_date: result.due_date,
            })
            .await?;
        Span::current().record("event.id", event.id.to_string());

        if !event.done {
            info!(event_id = %event.id, due_date = ?event.due_date, "event deferred");
            return Ok(IngressOutcome::Deferred {
                event_id: event.id,
                due_date: event.due_date,
            });
        }

        if !message.only_execute {
            self.bus
                .publish_completion(&Completion {
                    workflow_id: event.workflow_id,
                    event_id: event.id,
                })
                .await?;
        }
        self.project_status(template, snapshot, &event, attempt.calculated.as_ref())
            .await;

        Ok(IngressOutcome::Completed { event_id: event.id })
    }

    /// Set the workflow status from the first matching status rule.
    /// Errors are logged only.
    async fn project_status(
        &self,
        template: &EventTemplate,
        snapshot: &WorkflowSnapshot,
        event: &Event,
        calculated: Option<&Value>,
    ) {
        if template.status_rules.is_empty() {
            return;
        }
        let mut events = snapshot.events.clone();
        events.push(event.clone());
        let scope = EvalScope {
            workflow: &snapshot.workflow,
            documents: &snapshot.documents,
            events: &events,
        };
        let opts = json!({ "calculated": calculated, "event": event });

        for rule in &template.status_rules {
            let matched = match &rule.condition {
                None => true,
                Some(condition) => match self.evaluator.evaluate(condition, &scope, &opts).await {
                    Ok(value) => is_truthy(&value),
                    Err(e) => {
                        warn!(status = %rule.status, error = %e, "status rule evaluation failed");
                        false
                    }
                },
            };
            if matched {
                if let Err(e) = self
                    .store
                    .set_workflow_status(snapshot.workflow.id, &rule.status)
                    .await
                {
                    warn!(status = %rule.status, error = %e, "failed to project workflow status");
                }
                return;
            }
        }
    }

    /// Step 5, failure path: requeue, soft failure or hard failure.
    async fn route_failure(
        &self,
        message: &TriggerMessage,
        attempt: &Attempt,
        cause: Error,
        now: DateTime<Utc>,
    ) -> IngressOutcome {
        let mut reason = cause.to_string();

        if cause.is_retryable()
            && let Some(delay) = attempt.settings.retry_if_error.delay_for(message.attempt())
        {
            let envelope = RetryEnvelope {
                message: message.clone(),
                retry_iterator: message.attempt() + 1,
                delay,
            };
            match self.bus.requeue(&envelope).await {
                Ok(()) => {
                    metrics::ingress_requeues().add(1, &[]);
                    warn!(
                        retry_iterator = envelope.retry_iterator,
                        delay_secs = delay.as_secs(),
                        error = %cause,
                        "event failed, requeued"
                    );
                    return IngressOutcome::Requeued {
                        retry_iterator: envelope.retry_iterator,
                        delay,
                    };
                }
                Err(e) => {
                    error!(error = %e, "requeue failed");
                    reason = format!("{reason} (requeue failed: {e})");
                }
            }
        }

        let failure = Failure {
            workflow_id: message.workflow_id,
            event_template_id: Some(message.event_template_id),
            event_id: None,
            message: serde_json::to_value(message).unwrap_or(Value::Null),
            cause: reason,
        };

        if attempt.settings.not_fail_on_error
            && !matches!(cause, Error::LoopGuard { .. })
            && let Some(template) = attempt.template.as_ref()
        {
            return self.soft_fail(message, template, failure, now).await;
        }

        error!(error = %failure.cause, "event failed");
        let cause = failure.cause.clone();
        drop(self.failures.hard(failure).await);
        IngressOutcome::HardFailed { cause }
    }

    /// Record a warning plus a done diagnostic event, and carry on.
    async fn soft_fail(
        &self,
        message: &TriggerMessage,
        template: &EventTemplate,
        mut failure: Failure,
        now: DateTime<Utc>,
    ) -> IngressOutcome {
        warn!(error = %failure.cause, "event failed, continuing (notFailOnError)");
        let mut scheduling = SchedulingState {
            retry_iterator: message.retry_iterator,
            ..SchedulingState::default()
        };
        scheduling
            .statuses
            .insert(now, format!("error: {}", failure.cause));

        let event = self
            .store
            .insert_event(NewEvent {
                workflow_id: message.workflow_id,
                event_template_id: template.id,
                kind: template.kind,
                name: template.name.clone(),
                done: true,
                result: json!({ "error": failure.cause }),
                scheduling,
                document_id: None,
                due_date: None,
            })
            .await;

        let event_id = match event {
            Ok(event) => Some(event.id),
            Err(e) => {
                error!(error = %e, "failed to record diagnostic event");
                None
            }
        };
        failure.event_id = event_id;
        self.failures.warning(failure).await;

        if let Some(event_id) = event_id
            && !message.only_execute
        {
            let completion = Completion {
                workflow_id: message.workflow_id,
                event_id,
            };
            if let Err(e) = self.bus.publish_completion(&completion).await {
                error!(%event_id, error = %e, "failed to publish completion");
            }
        }

        IngressOutcome::SoftFailed { event_id }
    }

    async fn record_debug(
        &self,
        message: &TriggerMessage,
        debug_id: Uuid,
        attempt: &Attempt,
        executed: Result<(WorkflowSnapshot, ResultContext)>,
        now: DateTime<Utc>,
    ) -> IngressOutcome {
        let (result, error) = match executed {
            Ok((_, result)) => (Some(Value::Object(result.result)), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let failed = error.is_some();

        let debug = WorkflowDebug {
            id: debug_id,
            workflow_id: message.workflow_id,
            event_template_id: message.event_template_id,
            calculated: attempt.calculated.clone(),
            result,
            error,
            created_at: now,
        };
        if let Err(e) = self.store.insert_workflow_debug(debug).await {
            error!(%debug_id, error = %e, "failed to record debug run");
        }
        IngressOutcome::Debugged { debug_id, failed }
    }
}
