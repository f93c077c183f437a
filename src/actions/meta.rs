//! `meta`: merge or delete task metadata keys.
//!
//! Tasks of the current workflow are always writable. A task in another
//! workflow is writable only when its task template is listed in the
//! event template's `metaAllowedTemplates`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{EventHandler, HandlerContext, ResultContext};
use crate::error::{Error, Result};
use crate::services::TaskService;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaStep {
    #[serde(default)]
    key: Option<String>,
    task_id: Uuid,
    #[serde(default)]
    set: Map<String, Value>,
    #[serde(default)]
    delete: Vec<String>,
}

pub struct MetaHandler {
    tasks: Arc<dyn TaskService>,
}

impl MetaHandler {
    pub fn new(tasks: Arc<dyn TaskService>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl EventHandler for MetaHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<ResultContext> {
        let steps: Vec<MetaStep> = ctx.section()?;
        let mut outcome = ResultContext::completed();

        for step in steps {
            let task = self.tasks.get_task(step.task_id).await?;
            if task.workflow_id != ctx.workflow_id()
                && !ctx.settings.meta_allowed_templates.contains(&task.task_template_id)
            {
                return Err(Error::Permission(format!(
                    "template {} may not write metadata of task {} (workflow {}, task template {})",
                    ctx.template.id, task.id, task.workflow_id, task.task_template_id
                )));
            }

            let value = self
                .tasks
                .update_meta(step.task_id, &step.set, &step.delete)
                .await?;
            let key = step.key.unwrap_or_else(|| step.task_id.to_string());
            outcome.result.insert(key, value);
        }

        Ok(outcome)
    }
}
