//! Failure recording and admin alerts.
//!
//! Audit rows are written inline. The alert email goes out on a spawned
//! task; its errors are logged and never reach the caller.

use std::sync::Arc;

use opentelemetry::KeyValue;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

use crate::model::{NewWorkflowError, Severity, WorkflowError};
use crate::services::{AlertContext, Alerting};
use crate::store::EventStore;
use crate::telemetry::metrics;

/// One failure to record.
#[derive(Debug, Clone)]
pub struct Failure {
    pub workflow_id: Uuid,
    pub event_template_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    /// The originating message, as received.
    pub message: Value,
    pub cause: String,
}

impl Failure {
    fn into_record(self, severity: Severity) -> NewWorkflowError {
        NewWorkflowError {
            workflow_id: self.workflow_id,
            event_template_id: self.event_template_id,
            event_id: self.event_id,
            severity,
            message: self.message,
            cause: self.cause,
        }
    }
}

#[derive(Clone)]
pub struct FailureReporter {
    store: Arc<dyn EventStore>,
    alerting: Arc<dyn Alerting>,
    subscribers: Arc<[String]>,
}

impl FailureReporter {
    pub fn new(
        store: Arc<dyn EventStore>,
        alerting: Arc<dyn Alerting>,
        subscribers: Vec<String>,
    ) -> Self {
        Self {
            store,
            alerting,
            subscribers: subscribers.into(),
        }
    }

    /// Record a warning; processing continues as if nothing was produced.
    pub async fn warning(&self, failure: Failure) -> Option<WorkflowError> {
        metrics::workflow_failures().add(1, &[KeyValue::new("severity", "warning")]);
        match self
            .store
            .insert_workflow_error(failure.into_record(Severity::Warning))
            .await
        {
            Ok(row) => Some(row),
            Err(e) => {
                error!(error = %e, "failed to record workflow warning");
                None
            }
        }
    }

    /// Record an error, flag the workflow, and alert subscribers.
    ///
    /// Returns the handle of the alert task; dropping it detaches the task.
    pub async fn hard(&self, failure: Failure) -> JoinHandle<()> {
        metrics::workflow_failures().add(1, &[KeyValue::new("severity", "error")]);
        let workflow_id = failure.workflow_id;
        let context = AlertContext {
            workflow_id,
            event_template_id: failure.event_template_id,
            event_id: failure.event_id,
            cause: failure.cause.clone(),
            message: failure.message.clone(),
        };

        if let Err(e) = self
            .store
            .insert_workflow_error(failure.into_record(Severity::Error))
            .await
        {
            error!(%workflow_id, error = %e, "failed to record workflow error");
        }
        if let Err(e) = self.store.flag_unresolved_errors(workflow_id).await {
            error!(%workflow_id, error = %e, "failed to flag workflow errors");
        }

        let alerting = Arc::clone(&self.alerting);
        let subscribers = Arc::clone(&self.subscribers);
        tokio::spawn(async move {
            if subscribers.is_empty() {
                return;
            }
            if let Err(e) = alerting.send_emails(&subscribers, &context).await {
                warn!(workflow_id = %context.workflow_id, error = %e, "alert email failed");
            }
        })
    }
}
