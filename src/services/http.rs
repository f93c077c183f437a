//! HTTP action gateway.
//!
//! Every collaborator call becomes a JSON POST to `<base_url>/<path>`.
//! A 2xx response body is returned as the action result (empty body maps
//! to `null`); anything else is an [`Error::Action`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;
use uuid::Uuid;

use super::{
    ActionExecutor, ActionRequest, AlertContext, Alerting, DirectoryExecutor, DirectoryOp,
    DirectoryTarget, Notifier, RequestExecutor, RequestOp, TaskRef, TaskService, WorkflowOp,
    WorkflowService,
};
use crate::error::{Error, Result};

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "calling action gateway");
        let resp = self.client.post(&url).json(body).send().await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(Error::action(path, format!("HTTP {status}: {text}")));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl Notifier for HttpGateway {
    async fn send(&self, options: &Value) -> Result<Value> {
        self.post("notifications/send", options).await
    }
}

#[async_trait]
impl RequestExecutor for HttpGateway {
    async fn execute(&self, op: &RequestOp) -> Result<Value> {
        self.post(&format!("requests/{}", op.name()), op).await
    }

    async fn fetch_records(&self, register: &str, ids: &[String]) -> Result<Vec<Value>> {
        let found = self
            .post("requests/fetch", &json!({ "register": register, "ids": ids }))
            .await?;
        match found {
            Value::Array(records) => Ok(records),
            Value::Null => Ok(Vec::new()),
            other => Err(Error::action(
                "requests/fetch",
                format!("expected an array of records, got {other}"),
            )),
        }
    }

    async fn delete_records(&self, register: &str, ids: &[String]) -> Result<()> {
        self.post("requests/delete", &json!({ "register": register, "ids": ids }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DirectoryExecutor for HttpGateway {
    async fn apply(&self, op: &DirectoryOp) -> Result<Value> {
        let path = match op.target {
            DirectoryTarget::Unit => "directory/unit",
            DirectoryTarget::User => "directory/user",
        };
        self.post(path, op).await
    }
}

#[async_trait]
impl WorkflowService for HttpGateway {
    async fn apply(&self, origin_workflow_id: Uuid, op: &WorkflowOp) -> Result<Value> {
        self.post(&format!("workflows/{origin_workflow_id}/actions"), op)
            .await
    }
}

#[async_trait]
impl TaskService for HttpGateway {
    async fn get_task(&self, task_id: Uuid) -> Result<TaskRef> {
        let found = self.post("tasks/get", &json!({ "id": task_id })).await?;
        if found.is_null() {
            return Err(Error::NotFound(format!("task {task_id}")));
        }
        Ok(serde_json::from_value(found)?)
    }

    async fn update_meta(
        &self,
        task_id: Uuid,
        set: &Map<String, Value>,
        delete: &[String],
    ) -> Result<Value> {
        self.post(
            "tasks/meta",
            &json!({ "id": task_id, "set": set, "delete": delete }),
        )
        .await
    }

    async fn cancel_tasks(&self, workflow_id: Uuid, task_template_ids: &[Uuid]) -> Result<u64> {
        let cancelled = self
            .post(
                "tasks/cancel",
                &json!({ "workflowId": workflow_id, "taskTemplateIds": task_template_ids }),
            )
            .await?;
        Ok(cancelled
            .get("cancelled")
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}

#[async_trait]
impl ActionExecutor for HttpGateway {
    async fn execute(&self, request: &ActionRequest) -> Result<Value> {
        self.post(&format!("actions/{}", request.kind), request).await
    }
}

#[async_trait]
impl Alerting for HttpGateway {
    async fn send_emails(&self, subscribers: &[String], context: &AlertContext) -> Result<()> {
        if subscribers.is_empty() {
            return Ok(());
        }
        self.post(
            "alerts/email",
            &json!({ "to": subscribers, "context": context }),
        )
        .await?;
        Ok(())
    }
}
