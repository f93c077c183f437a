//! External collaborators the engine calls but does not implement:
//! expression evaluation, notification delivery, register CRUD,
//! directory mutation, workflow/task management, clear/file execution,
//! and admin alerting.
//!
//! [`Services`] bundles one implementation of each and is built once at
//! startup. [`http::HttpGateway`] forwards every call to an action
//! gateway over HTTP; [`evaluator::TemplateEvaluator`] is the reference
//! expression interpreter.

pub mod evaluator;
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Document, Event, EventKind, Workflow};

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// The workflow state an expression is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct EvalScope<'a> {
    pub workflow: &'a Workflow,
    pub documents: &'a [Document],
    pub events: &'a [Event],
}

impl EvalScope<'_> {
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::json!({
            "workflow": serde_json::to_value(self.workflow)?,
            "documents": serde_json::to_value(self.documents)?,
            "events": serde_json::to_value(self.events)?,
        }))
    }
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Resolve `expr` against `scope`. `opts` carries extra bindings
    /// (e.g. an already computed `calculated` bag).
    async fn evaluate(&self, expr: &str, scope: &EvalScope<'_>, opts: &Value) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification described by `options`.
    async fn send(&self, options: &Value) -> Result<Value>;
}

/// One register or document sub-operation of a `request` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RequestOp {
    Get { register: String, id: String },
    Create { register: String, record: Value },
    Update { register: String, id: String, record: Value },
    Delete { register: String, id: String },
    BulkCreate { register: String, records: Vec<Value> },
    BulkUpdate { register: String, records: Vec<Value> },
    BulkDelete { register: String, ids: Vec<String> },
    List {
        register: String,
        #[serde(default)]
        filter: Value,
    },
    CsvExport {
        register: String,
        #[serde(default)]
        filter: Value,
    },
    External { name: String, payload: Value },
    DocumentGet { document_id: Uuid },
    DocumentSave { document_id: Option<Uuid>, data: Value },
    Blockchain { payload: Value },
}

impl RequestOp {
    pub fn name(&self) -> &'static str {
        match self {
            RequestOp::Get { .. } => "get",
            RequestOp::Create { .. } => "create",
            RequestOp::Update { .. } => "update",
            RequestOp::Delete { .. } => "delete",
            RequestOp::BulkCreate { .. } => "bulkCreate",
            RequestOp::BulkUpdate { .. } => "bulkUpdate",
            RequestOp::BulkDelete { .. } => "bulkDelete",
            RequestOp::List { .. } => "list",
            RequestOp::CsvExport { .. } => "csvExport",
            RequestOp::External { .. } => "external",
            RequestOp::DocumentGet { .. } => "documentGet",
            RequestOp::DocumentSave { .. } => "documentSave",
            RequestOp::Blockchain { .. } => "blockchain",
        }
    }
}

#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, op: &RequestOp) -> Result<Value>;

    /// Fetch the records about to be deleted. Missing ids are simply absent.
    async fn fetch_records(&self, register: &str, ids: &[String]) -> Result<Vec<Value>>;

    async fn delete_records(&self, register: &str, ids: &[String]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DirectoryTarget {
    Unit,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DirectoryAction {
    Create,
    Update,
    AddMember,
    RemoveMember,
    AddHead,
    RemoveHead,
}

/// How a directory entry is addressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Selector {
    Id(String),
    Code(String),
    New,
}

/// One org-unit or user mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryOp {
    pub target: DirectoryTarget,
    pub action: DirectoryAction,
    pub selector: Selector,
    pub payload: Value,
}

#[async_trait]
pub trait DirectoryExecutor: Send + Sync {
    async fn apply(&self, op: &DirectoryOp) -> Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkflowOp {
    /// Start a child workflow.
    Spawn {
        workflow_template_id: Uuid,
        #[serde(default)]
        data: Value,
    },
    /// Push a status onto related workflows.
    PropagateStatus { workflow_ids: Vec<Uuid>, status: String },
    /// Replace the performers of a task.
    Reassign { task_id: Uuid, performers: Vec<Value> },
}

#[async_trait]
pub trait WorkflowService: Send + Sync {
    async fn apply(&self, origin_workflow_id: Uuid, op: &WorkflowOp) -> Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub task_template_id: Uuid,
}

#[async_trait]
pub trait TaskService: Send + Sync {
    async fn get_task(&self, task_id: Uuid) -> Result<TaskRef>;

    /// Merge `set` into the task metadata and drop the `delete` keys.
    async fn update_meta(
        &self,
        task_id: Uuid,
        set: &Map<String, Value>,
        delete: &[String],
    ) -> Result<Value>;

    /// Cancel in-flight tasks of the given templates; returns how many.
    async fn cancel_tasks(&self, workflow_id: Uuid, task_template_ids: &[Uuid]) -> Result<u64>;
}

/// Input for the fully delegated `clear` and `file` event types.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub kind: EventKind,
    pub workflow_id: Uuid,
    pub event_template_id: Uuid,
    pub calculated: Value,
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, request: &ActionRequest) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// Alerting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertContext {
    pub workflow_id: Uuid,
    pub event_template_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub cause: String,
    pub message: Value,
}

#[async_trait]
pub trait Alerting: Send + Sync {
    async fn send_emails(&self, subscribers: &[String], context: &AlertContext) -> Result<()>;
}

/// One implementation of every collaborator, shared by reference.
#[derive(Clone)]
pub struct Services {
    pub evaluator: Arc<dyn Evaluator>,
    pub notifier: Arc<dyn Notifier>,
    pub requests: Arc<dyn RequestExecutor>,
    pub directory: Arc<dyn DirectoryExecutor>,
    pub workflows: Arc<dyn WorkflowService>,
    pub tasks: Arc<dyn TaskService>,
    pub actions: Arc<dyn ActionExecutor>,
    pub alerting: Arc<dyn Alerting>,
}

impl Services {
    /// Route every action collaborator to the same gateway.
    pub fn from_gateway<G>(evaluator: Arc<dyn Evaluator>, gateway: Arc<G>) -> Self
    where
        G: Notifier
            + RequestExecutor
            + DirectoryExecutor
            + WorkflowService
            + TaskService
            + ActionExecutor
            + Alerting
            + 'static,
    {
        Self {
            evaluator,
            notifier: gateway.clone(),
            requests: gateway.clone(),
            directory: gateway.clone(),
            workflows: gateway.clone(),
            tasks: gateway.clone(),
            actions: gateway.clone(),
            alerting: gateway,
        }
    }
}
