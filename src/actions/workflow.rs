//! `workflow`: spawn children, propagate status, reassign performers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{EventHandler, HandlerContext, ResultContext};
use crate::error::Result;
use crate::services::{WorkflowOp, WorkflowService};

#[derive(Debug, Deserialize)]
struct WorkflowStep {
    #[serde(default)]
    key: Option<String>,
    #[serde(flatten)]
    op: WorkflowOp,
}

fn op_name(op: &WorkflowOp) -> &'static str {
    match op {
        WorkflowOp::Spawn { .. } => "spawn",
        WorkflowOp::PropagateStatus { .. } => "propagateStatus",
        WorkflowOp::Reassign { .. } => "reassign",
    }
}

pub struct WorkflowHandler {
    workflows: Arc<dyn WorkflowService>,
}

impl WorkflowHandler {
    pub fn new(workflows: Arc<dyn WorkflowService>) -> Self {
        Self { workflows }
    }
}

#[async_trait]
impl EventHandler for WorkflowHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<ResultContext> {
        let steps: Vec<WorkflowStep> = ctx.section()?;
        let mut outcome = ResultContext::completed();
        for step in steps {
            let value = self.workflows.apply(ctx.workflow_id(), &step.op).await?;
            let key = step.key.unwrap_or_else(|| op_name(&step.op).to_string());
            outcome.result.insert(key, value);
        }
        Ok(outcome)
    }
}
