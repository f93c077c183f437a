//! Event templates and the declarative settings read from their schema.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use super::event::EventKind;
use crate::error::{Error, Result};
use crate::schedule::backoff::{RetryLadder, parse_ladder};

/// Cached, rarely-mutated event configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTemplate {
    pub id: Uuid,
    pub name: String,
    pub kind: EventKind,
    /// JSON document handed to the evaluator.
    pub schema: String,
    /// Workflow status projected after a completed event.
    #[serde(default)]
    pub status_rules: Vec<StatusRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRule {
    pub status: String,
    /// Expression evaluated against the workflow state; absent means always.
    #[serde(default)]
    pub condition: Option<String>,
}

/// Literal settings pulled from a template schema without evaluating it,
/// so they are available even when evaluation is what failed.
#[derive(Debug, Clone, Default)]
pub struct TemplateSettings {
    pub retry_if_error: RetryLadder,
    pub not_fail_on_error: bool,
    /// Notification resend offsets (`onErrorTryResendAfter`).
    pub resend_after: Vec<Duration>,
    /// Foreign task templates whose metadata this template may write.
    pub meta_allowed_templates: HashSet<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    retry_if_error: Vec<String>,
    #[serde(default)]
    not_fail_on_error: bool,
    #[serde(default)]
    on_error_try_resend_after: Vec<String>,
    #[serde(default)]
    meta_allowed_templates: Vec<Uuid>,
}

impl EventTemplate {
    pub fn settings(&self) -> Result<TemplateSettings> {
        let raw: RawSettings = serde_json::from_str(&self.schema)
            .map_err(|e| Error::InvalidSchema(format!("template {}: {e}", self.id)))?;
        Ok(TemplateSettings {
            retry_if_error: RetryLadder::new(parse_ladder(&raw.retry_if_error)?),
            not_fail_on_error: raw.not_fail_on_error,
            resend_after: parse_ladder(&raw.on_error_try_resend_after)?,
            meta_allowed_templates: raw.meta_allowed_templates.into_iter().collect(),
        })
    }
}
