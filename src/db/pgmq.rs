//! pgmq queue operations via direct SQLx, and the pgmq-backed
//! [`MessageBus`].

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::model::{Completion, RetryEnvelope};
use crate::store::MessageBus;

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Send a message; `delay_seconds` > 0 hides it until the delay passes.
    pub async fn send_to_queue(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
        delay_seconds: i32,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(queue_name)
            .bind(payload)
            .bind(delay_seconds)
            .fetch_one(self.pool())
            .await?;
        debug!(queue = queue_name, msg_id = row.0, delay_seconds, "queued message");
        Ok(row.0)
    }

    /// Read the next visible message, hiding it for `vt_seconds`.
    pub async fn read_from_queue(
        &self,
        queue_name: &str,
        vt_seconds: i32,
    ) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >("SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, 1)")
        .bind(queue_name)
        .bind(vt_seconds)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|(msg_id, read_ct, enqueued_at, message)| PgmqMessage {
            msg_id,
            read_ct,
            enqueued_at,
            message,
        }))
    }

    /// Archive a message: the acknowledgement, kept for audit.
    pub async fn archive_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageBus for super::Db {
    async fn requeue(&self, envelope: &RetryEnvelope) -> Result<()> {
        let payload = serde_json::to_value(envelope.to_wire())?;
        let delay = i32::try_from(envelope.delay.as_secs()).unwrap_or(i32::MAX);
        self.send_to_queue(&self.ingress_queue, &payload, delay)
            .await?;
        Ok(())
    }

    async fn publish_completion(&self, completion: &Completion) -> Result<()> {
        let payload = serde_json::to_value(completion)?;
        self.send_to_queue(&self.outbound_queue, &payload, 0).await?;
        Ok(())
    }
}
