//! `stop`: cancel in-flight tasks and pending scheduled events.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{EventHandler, HandlerContext, ResultContext};
use crate::error::Result;
use crate::services::TaskService;
use crate::store::EventStore;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopSection {
    #[serde(default)]
    task_template_ids: Vec<Uuid>,
    #[serde(default)]
    event_template_ids: Vec<Uuid>,
}

pub struct StopHandler {
    tasks: Arc<dyn TaskService>,
    store: Arc<dyn EventStore>,
}

impl StopHandler {
    pub fn new(tasks: Arc<dyn TaskService>, store: Arc<dyn EventStore>) -> Self {
        Self { tasks, store }
    }
}

#[async_trait]
impl EventHandler for StopHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<ResultContext> {
        let section: StopSection = ctx.section()?;
        let workflow_id = ctx.workflow_id();

        let tasks = if section.task_template_ids.is_empty() {
            0
        } else {
            self.tasks
                .cancel_tasks(workflow_id, &section.task_template_ids)
                .await?
        };
        let events = if section.event_template_ids.is_empty() {
            0
        } else {
            self.store
                .cancel_pending_events(workflow_id, &section.event_template_ids)
                .await?
        };

        Ok(ResultContext::completed().with("stop", json!({ "tasks": tasks, "events": events })))
    }
}
