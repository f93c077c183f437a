//! Ingress queue consumer: pgmq in, pipeline, archive.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{error, info, warn};

use super::ingress::IngressPipeline;
use crate::config::SchedulerConfig;
use crate::db::Db;
use crate::db::pgmq::PgmqMessage;
use crate::error::Result;
use crate::model::TriggerMessage;

pub struct IngressConsumer {
    db: Arc<Db>,
    pipeline: Arc<IngressPipeline>,
    config: SchedulerConfig,
    shutdown: Arc<Notify>,
}

impl IngressConsumer {
    pub fn new(db: Arc<Db>, pipeline: Arc<IngressPipeline>, config: SchedulerConfig) -> Self {
        Self {
            db,
            pipeline,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the consumer loop to stop after the current message.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Drain the queue, sleep, repeat, until shutdown.
    pub async fn run(&self) -> Result<()> {
        info!(queue = %self.config.ingress_queue, "ingress consumer started");
        loop {
            match self.drain().await {
                Ok(0) => {}
                Ok(n) => info!(processed = n, "ingress queue drained"),
                Err(e) => error!("ingress consumer error: {e}"),
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("ingress consumer shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.ingress_poll_interval) => {}
            }
        }
    }

    /// Process messages until the queue reports empty.
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while let Some(msg) = self
            .db
            .read_from_queue(&self.config.ingress_queue, self.config.visibility_timeout)
            .await?
        {
            self.process(msg).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Run one message through the pipeline and archive it exactly once.
    async fn process(&self, msg: PgmqMessage) -> Result<()> {
        match serde_json::from_value::<TriggerMessage>(msg.message.clone()) {
            Ok(trigger) => {
                if msg.read_ct > 1 {
                    warn!(msg_id = msg.msg_id, read_ct = msg.read_ct, "redelivered ingress message");
                }
                self.pipeline.handle(&trigger).await;
            }
            Err(e) => {
                error!(msg_id = msg.msg_id, payload = %msg.message, "bad ingress payload: {e}");
            }
        }
        self.db
            .archive_message(&self.config.ingress_queue, msg.msg_id)
            .await
    }
}
