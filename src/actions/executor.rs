//! `clear` and `file`: handed whole to the action executor.

use std::sync::Arc;

use async_trait::async_trait;

use super::{EventHandler, HandlerContext, ResultContext};
use crate::error::Result;
use crate::services::{ActionExecutor, ActionRequest};

pub struct ExecutorHandler {
    actions: Arc<dyn ActionExecutor>,
}

impl ExecutorHandler {
    pub fn new(actions: Arc<dyn ActionExecutor>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl EventHandler for ExecutorHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<ResultContext> {
        let request = ActionRequest {
            kind: ctx.kind(),
            workflow_id: ctx.workflow_id(),
            event_template_id: ctx.template.id,
            calculated: ctx.raw_section().unwrap_or(ctx.calculated).clone(),
        };
        let value = self.actions.execute(&request).await?;
        Ok(ResultContext::completed().with(ctx.kind().as_str(), value))
    }
}
