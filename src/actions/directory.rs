//! `unit` and `user`: org-unit and user directory mutations.
//!
//! Each step addresses its entry by `id` or `code`, or a batch through
//! `ids` / `codes`; batches run one entry at a time and store an array.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{EventHandler, HandlerContext, ResultContext};
use crate::error::{Error, Result};
use crate::model::EventKind;
use crate::services::{DirectoryAction, DirectoryExecutor, DirectoryOp, DirectoryTarget, Selector};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryStep {
    #[serde(default)]
    key: Option<String>,
    action: DirectoryAction,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    codes: Vec<String>,
    #[serde(default)]
    payload: Value,
}

impl DirectoryStep {
    fn selectors(&self) -> Result<Vec<Selector>> {
        if !self.ids.is_empty() || !self.codes.is_empty() {
            return Ok(self
                .ids
                .iter()
                .cloned()
                .map(Selector::Id)
                .chain(self.codes.iter().cloned().map(Selector::Code))
                .collect());
        }
        match (&self.id, &self.code) {
            (Some(id), _) => Ok(vec![Selector::Id(id.clone())]),
            (None, Some(code)) => Ok(vec![Selector::Code(code.clone())]),
            (None, None) if self.action == DirectoryAction::Create => Ok(vec![Selector::New]),
            (None, None) => Err(Error::InvalidSchema(format!(
                "directory action {:?} needs an id or code",
                self.action
            ))),
        }
    }

    fn is_batch(&self) -> bool {
        !self.ids.is_empty() || !self.codes.is_empty()
    }
}

pub struct DirectoryHandler {
    directory: Arc<dyn DirectoryExecutor>,
}

impl DirectoryHandler {
    pub fn new(directory: Arc<dyn DirectoryExecutor>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl EventHandler for DirectoryHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<ResultContext> {
        let target = match ctx.kind() {
            EventKind::Unit => DirectoryTarget::Unit,
            EventKind::User => DirectoryTarget::User,
            other => {
                return Err(Error::InvalidSchema(format!(
                    "directory handler cannot run '{other}' events"
                )));
            }
        };

        let steps: Vec<DirectoryStep> = ctx.section()?;
        let mut outcome = ResultContext::completed();

        for step in steps {
            let mut results = Vec::new();
            for selector in step.selectors()? {
                let op = DirectoryOp {
                    target,
                    action: step.action,
                    selector,
                    payload: step.payload.clone(),
                };
                results.push(self.directory.apply(&op).await?);
            }

            let key = match &step.key {
                Some(key) => key.clone(),
                None => serde_json::to_value(step.action)?
                    .as_str()
                    .unwrap_or(ctx.kind().as_str())
                    .to_string(),
            };
            let value = if step.is_batch() {
                Value::Array(results)
            } else {
                results.pop().unwrap_or(Value::Null)
            };
            outcome.result.insert(key, value);
        }

        Ok(outcome)
    }
}
