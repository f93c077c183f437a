//! Error types for workflow-events.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error(
        "loop guard tripped for workflow {workflow_id} template {event_template_id}: {count} events (ceiling {ceiling})"
    )]
    LoopGuard {
        workflow_id: Uuid,
        event_template_id: Uuid,
        count: i64,
        ceiling: i64,
    },

    #[error("claim on event {0} no longer held")]
    ClaimLost(Uuid),

    #[error("{action} failed: {message}")]
    Action { action: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn action(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Action {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Whether the ingress retry ladder may requeue after this error.
    ///
    /// Loop-guard trips and permission rejections go straight to terminal
    /// handling; everything else is retried while the ladder lasts.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::LoopGuard { .. } | Error::Permission(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
