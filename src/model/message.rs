//! Queue payloads: inbound triggers, retry envelopes, outbound completions.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// One trigger for one workflow event, consumed from the ingress queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMessage {
    pub workflow_id: Uuid,
    pub event_template_id: Uuid,
    /// Dry-run marker: only a debug record is written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_id: Option<Uuid>,
    /// Suppresses the outbound completion message.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub only_execute: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_iterator: Option<u32>,
}

impl TriggerMessage {
    pub fn new(workflow_id: Uuid, event_template_id: Uuid) -> Self {
        Self {
            workflow_id,
            event_template_id,
            debug_id: None,
            only_execute: false,
            retry_iterator: None,
        }
    }

    pub fn debug(mut self, debug_id: Uuid) -> Self {
        self.debug_id = Some(debug_id);
        self
    }

    pub fn only_execute(mut self) -> Self {
        self.only_execute = true;
        self
    }

    /// Zero-based position on the ingress retry ladder.
    pub fn attempt(&self) -> u32 {
        self.retry_iterator.unwrap_or(0)
    }
}

/// A failed trigger waiting on the queue for redelivery.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryEnvelope {
    pub message: TriggerMessage,
    pub retry_iterator: u32,
    pub delay: Duration,
}

impl RetryEnvelope {
    /// The payload as it goes back on the ingress queue.
    pub fn to_wire(&self) -> TriggerMessage {
        TriggerMessage {
            retry_iterator: Some(self.retry_iterator),
            ..self.message.clone()
        }
    }
}

/// Emitted once an event is done; consumed by the workflow manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub workflow_id: Uuid,
    pub event_id: Uuid,
}
