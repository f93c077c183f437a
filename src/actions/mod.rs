//! Per-type event handlers and the dispatch table.
//!
//! Every handler reads its own section of the evaluated template
//! (`calculated[<type>]`) and returns a [`ResultContext`] describing what
//! to persist. Handlers never write events themselves; the ingress
//! pipeline owns persistence and completion.

pub mod delay;
pub mod directory;
pub mod executor;
pub mod meta;
pub mod notification;
pub mod request;
pub mod stop;
pub mod workflow;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::RequestLimits;
use crate::error::{Error, Result};
use crate::model::{EventKind, EventTemplate, SchedulingState, TemplateSettings, WorkflowSnapshot};
use crate::services::Services;
use crate::store::EventStore;

pub use delay::DelayHandler;
pub use directory::DirectoryHandler;
pub use executor::ExecutorHandler;
pub use meta::MetaHandler;
pub use notification::NotificationHandler;
pub use request::RequestHandler;
pub use stop::StopHandler;
pub use workflow::WorkflowHandler;

/// Everything a handler may read for one trigger.
pub struct HandlerContext<'a> {
    pub template: &'a EventTemplate,
    pub settings: &'a TemplateSettings,
    pub snapshot: &'a WorkflowSnapshot,
    /// The evaluated template schema.
    pub calculated: &'a Value,
    pub now: DateTime<Utc>,
}

impl HandlerContext<'_> {
    pub fn workflow_id(&self) -> Uuid {
        self.snapshot.workflow.id
    }

    pub fn kind(&self) -> EventKind {
        self.template.kind
    }

    /// The raw `calculated[<type>]` section, if present.
    pub fn raw_section(&self) -> Option<&Value> {
        self.calculated
            .get(self.kind().as_str())
            .filter(|v| !v.is_null())
    }

    /// Deserialize this handler's section; missing is an error.
    pub fn section<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self.raw_section().ok_or_else(|| {
            Error::InvalidSchema(format!(
                "template {} has no '{}' section",
                self.template.id,
                self.kind()
            ))
        })?;
        serde_json::from_value(raw.clone()).map_err(|e| {
            Error::InvalidSchema(format!(
                "template {} '{}' section: {e}",
                self.template.id,
                self.kind()
            ))
        })
    }
}

/// What a handler produced: the result bag to store plus scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultContext {
    /// Keyed by action name.
    pub result: Map<String, Value>,
    pub done: bool,
    pub due_date: Option<DateTime<Utc>>,
    pub scheduling: SchedulingState,
    pub document_id: Option<Uuid>,
}

impl ResultContext {
    /// A finished event with an empty result.
    pub fn completed() -> Self {
        Self {
            result: Map::new(),
            done: true,
            due_date: None,
            scheduling: SchedulingState::default(),
            document_id: None,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.result.insert(key.into(), value);
        self
    }

    /// Leave the event pending until `due_date`.
    pub fn pending_until(mut self, due_date: Option<DateTime<Utc>>) -> Self {
        self.done = false;
        self.due_date = due_date;
        self
    }
}

impl Default for ResultContext {
    fn default() -> Self {
        Self::completed()
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<ResultContext>;
}

/// Maps every [`EventKind`] onto its handler.
pub struct Dispatcher {
    notification: NotificationHandler,
    delay: DelayHandler,
    request: RequestHandler,
    stop: StopHandler,
    directory: DirectoryHandler,
    workflow: WorkflowHandler,
    meta: MetaHandler,
    clear: ExecutorHandler,
    file: ExecutorHandler,
}

impl Dispatcher {
    pub fn new(services: &Services, store: Arc<dyn EventStore>, limits: RequestLimits) -> Self {
        Self {
            notification: NotificationHandler::new(services.notifier.clone()),
            delay: DelayHandler,
            request: RequestHandler::new(services.requests.clone(), limits),
            stop: StopHandler::new(services.tasks.clone(), store),
            directory: DirectoryHandler::new(services.directory.clone()),
            workflow: WorkflowHandler::new(services.workflows.clone()),
            meta: MetaHandler::new(services.tasks.clone()),
            clear: ExecutorHandler::new(services.actions.clone()),
            file: ExecutorHandler::new(services.actions.clone()),
        }
    }

    pub fn handler(&self, kind: EventKind) -> &dyn EventHandler {
        match kind {
            EventKind::Notification => &self.notification,
            EventKind::Delay => &self.delay,
            EventKind::Request => &self.request,
            EventKind::Stop => &self.stop,
            EventKind::Unit | EventKind::User => &self.directory,
            EventKind::Workflow => &self.workflow,
            EventKind::Meta => &self.meta,
            EventKind::Clear => &self.clear,
            EventKind::File => &self.file,
        }
    }

    pub async fn dispatch(&self, ctx: &HandlerContext<'_>) -> Result<ResultContext> {
        self.handler(ctx.kind()).handle(ctx).await
    }
}
