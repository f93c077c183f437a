//! Workflow-side records the engine reads and writes: workflows, documents,
//! error audit rows and dry-run debug rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::Event;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub workflow_template_id: Option<Uuid>,
    pub status: Option<String>,
    /// Set by hard failures; processing halts until an operator resolves it.
    pub has_unresolved_errors: bool,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub task_id: Option<Uuid>,
    pub data: serde_json::Value,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Everything a handler may read about a workflow at dispatch time.
#[derive(Debug, Clone)]
pub struct WorkflowSnapshot {
    pub workflow: Workflow,
    /// In creation order.
    pub events: Vec<Event>,
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        })
    }
}

impl std::str::FromStr for Severity {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            other => Err(crate::error::Error::Other(format!("unknown severity: {other}"))),
        }
    }
}

/// Append-only failure audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowError {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub event_template_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub severity: Severity,
    /// The originating message, as received.
    pub message: serde_json::Value,
    pub cause: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWorkflowError {
    pub workflow_id: Uuid,
    pub event_template_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub severity: Severity,
    pub message: serde_json::Value,
    pub cause: String,
}

/// Outcome of a dry run; the only row a `debugId` trigger ever writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDebug {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub event_template_id: Uuid,
    pub calculated: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
