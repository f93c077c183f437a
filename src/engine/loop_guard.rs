//! Same-template loop guard.

use std::sync::Arc;

use tracing::warn;

use crate::error::{Error, Result};
use crate::model::TriggerMessage;
use crate::store::EventStore;
use crate::telemetry::metrics;

/// Rejects a trigger once its (workflow, template) pair already has
/// `ceiling` events, breaking runaway self-triggering chains.
pub struct LoopGuard {
    store: Arc<dyn EventStore>,
    ceiling: i64,
}

impl LoopGuard {
    pub fn new(store: Arc<dyn EventStore>, ceiling: i64) -> Self {
        Self { store, ceiling }
    }

    pub async fn check(&self, message: &TriggerMessage) -> Result<()> {
        let count = self
            .store
            .count_events(message.workflow_id, message.event_template_id)
            .await?;
        if count < self.ceiling {
            return Ok(());
        }

        metrics::loop_guard_trips().add(1, &[]);
        warn!(
            workflow_id = %message.workflow_id,
            template_id = %message.event_template_id,
            count,
            ceiling = self.ceiling,
            "loop guard tripped"
        );
        Err(Error::LoopGuard {
            workflow_id: message.workflow_id,
            event_template_id: message.event_template_id,
            count,
            ceiling: self.ceiling,
        })
    }
}
