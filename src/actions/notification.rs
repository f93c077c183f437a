//! Notification delivery with scheduled resends.
//!
//! The first attempt happens inline. On failure with a resend ladder the
//! event is stored pending at the next resend time and the daemon replays
//! it from `SchedulingState::options`; without a ladder the error goes
//! straight back to the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::{EventHandler, HandlerContext, ResultContext};
use crate::error::{Error, Result};
use crate::model::{Event, SchedulingState};
use crate::schedule::backoff::{ResendLadder, parse_ladder};
use crate::services::Notifier;
use crate::telemetry::metrics;

pub const STATUS_SENT: &str = "sent";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationSection {
    #[serde(default)]
    on_error_try_resend_after: Option<Vec<String>>,
    #[serde(flatten)]
    options: Map<String, Value>,
}

pub struct NotificationHandler {
    notifier: Arc<dyn Notifier>,
}

impl NotificationHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<ResultContext> {
        let section: NotificationSection = ctx.section()?;
        let resend_after = match section.on_error_try_resend_after {
            Some(raw) => parse_ladder(&raw)?,
            None => ctx.settings.resend_after.clone(),
        };
        let options = Value::Object(section.options);

        match self.notifier.send(&options).await {
            Ok(sent) => {
                metrics::notification_attempts().add(1, &[KeyValue::new("result", "sent")]);
                let mut outcome = ResultContext::completed().with("notification", sent);
                outcome.scheduling.statuses.insert(ctx.now, STATUS_SENT.to_string());
                Ok(outcome)
            }
            Err(e) if resend_after.is_empty() => Err(e),
            Err(e) => {
                let mut scheduling = SchedulingState {
                    due_dates: ResendLadder::new(resend_after).resolve(ctx.now)?,
                    options: Some(options),
                    ..SchedulingState::default()
                };
                let next = scheduling.record_attempt(ctx.now, failed_status(&e));
                metrics::notification_attempts().add(1, &[KeyValue::new("result", "postponed")]);
                warn!(
                    workflow_id = %ctx.workflow_id(),
                    template_id = %ctx.template.id,
                    next_attempt = ?next,
                    error = %e,
                    "notification failed, resend scheduled"
                );

                let mut outcome = ResultContext::completed()
                    .with("notification", json!({ "postponed": true, "error": e.to_string() }))
                    .pending_until(next);
                outcome.scheduling = scheduling;
                Ok(outcome)
            }
        }
    }
}

/// Result of replaying a postponed notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Redelivery {
    Sent {
        scheduling: SchedulingState,
    },
    Postponed {
        scheduling: SchedulingState,
        next: DateTime<Utc>,
    },
    /// The resend list is used up; the event is parked without a due date.
    Exhausted {
        scheduling: SchedulingState,
        cause: String,
    },
}

/// Replay the stored notification of a claimed event at `now`.
pub async fn redeliver(notifier: &dyn Notifier, event: &Event, now: DateTime<Utc>) -> Redelivery {
    let mut scheduling = event.scheduling.clone();
    let Some(options) = scheduling.options.clone() else {
        scheduling.record_attempt(now, "error: no stored notification options");
        scheduling.due_dates.clear();
        return Redelivery::Exhausted {
            scheduling,
            cause: format!("event {} has no stored notification options", event.id),
        };
    };

    match notifier.send(&options).await {
        Ok(_) => {
            scheduling.record_attempt(now, STATUS_SENT);
            scheduling.due_dates.clear();
            metrics::notification_attempts().add(1, &[KeyValue::new("result", "sent")]);
            info!(event_id = %event.id, "postponed notification delivered");
            Redelivery::Sent { scheduling }
        }
        Err(e) => match scheduling.record_attempt(now, failed_status(&e)) {
            Some(next) => {
                metrics::notification_attempts().add(1, &[KeyValue::new("result", "postponed")]);
                warn!(event_id = %event.id, next_attempt = %next, error = %e, "notification resend failed");
                Redelivery::Postponed { scheduling, next }
            }
            None => {
                metrics::notification_attempts().add(1, &[KeyValue::new("result", "exhausted")]);
                Redelivery::Exhausted {
                    scheduling,
                    cause: format!("notification resend list exhausted: {e}"),
                }
            }
        },
    }
}

fn failed_status(e: &Error) -> String {
    format!("error: {e}")
}
