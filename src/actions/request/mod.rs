//! `request`: register CRUD, document and external sub-operations.
//!
//! Steps run in declaration order and each result is stored under the
//! step's `key` (default: the action name). Bulk deletes are split into
//! chunks and pushed through a [`WorkQueue`].

pub mod queue;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use super::{EventHandler, HandlerContext, ResultContext};
use crate::config::RequestLimits;
use crate::error::{Error, Result};
use crate::services::{RequestExecutor, RequestOp};

pub use queue::WorkQueue;

#[derive(Debug, Deserialize)]
pub struct RequestStep {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(flatten)]
    pub op: RequestOp,
}

pub struct RequestHandler {
    requests: Arc<dyn RequestExecutor>,
    limits: RequestLimits,
}

impl RequestHandler {
    pub fn new(requests: Arc<dyn RequestExecutor>, limits: RequestLimits) -> Self {
        Self { requests, limits }
    }

    fn queue(&self) -> WorkQueue {
        WorkQueue::new(self.limits.concurrency, self.limits.interval)
    }

    /// Fetch every target record, verify none is missing, then delete.
    pub async fn bulk_delete(&self, register: &str, ids: &[String]) -> Result<Value> {
        let mut seen = HashSet::new();
        let ids: Vec<String> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        if ids.len() > self.limits.delete_cap
            && !self.limits.delete_cap_allowlist.contains(register)
        {
            return Err(Error::Permission(format!(
                "bulk delete of {} records from '{register}' exceeds the cap of {}",
                ids.len(),
                self.limits.delete_cap
            )));
        }

        let chunks: Vec<&[String]> = ids.chunks(self.limits.delete_chunk_size.max(1)).collect();
        let queue = self.queue();

        let fetches: Vec<_> = chunks
            .iter()
            .map(|chunk| self.requests.fetch_records(register, chunk))
            .collect();
        let records: Vec<Value> = queue
            .run(fetches)
            .await?
            .into_iter()
            .flatten()
            .collect();

        if records.len() != ids.len() {
            return Err(Error::action(
                "bulkDelete",
                format!(
                    "found {} of {} records in '{register}'; nothing deleted",
                    records.len(),
                    ids.len()
                ),
            ));
        }

        let deletes: Vec<_> = chunks
            .iter()
            .map(|chunk| self.requests.delete_records(register, chunk))
            .collect();
        queue.run(deletes).await?;

        info!(register, deleted = ids.len(), chunks = chunks.len(), "bulk delete finished");
        Ok(json!({ "deleted": ids.len(), "records": records }))
    }
}

#[async_trait]
impl EventHandler for RequestHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<ResultContext> {
        let steps: Vec<RequestStep> = ctx.section()?;
        let mut outcome = ResultContext::completed();

        for step in steps {
            let key = step.key.unwrap_or_else(|| step.op.name().to_string());
            debug!(key = %key, action = step.op.name(), "running request step");
            let value = match &step.op {
                RequestOp::BulkDelete { register, ids } => self.bulk_delete(register, ids).await?,
                op => self.requests.execute(op).await?,
            };

            if matches!(step.op, RequestOp::DocumentSave { .. }) {
                if let Some(id) = value.get("id").and_then(Value::as_str) {
                    outcome.document_id = Uuid::parse_str(id).ok();
                }
            }
            outcome.result.insert(key, value);
        }

        Ok(outcome)
    }
}
