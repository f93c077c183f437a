//! Shared fixtures: a recording fake for every collaborator and a harness
//! wiring it to the in-memory store.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use workflow_events::config::{RequestLimits, SchedulerConfig};
use workflow_events::engine::{Daemon, FailureReporter, IngressPipeline};
use workflow_events::error::{Error, Result};
use workflow_events::model::{
    Document, Event, EventKind, EventTemplate, NewEvent, SchedulingState, StatusRule,
    TriggerMessage, Workflow,
};
use workflow_events::services::evaluator::TemplateEvaluator;
use workflow_events::services::{
    ActionExecutor, ActionRequest, AlertContext, Alerting, DirectoryExecutor, DirectoryOp,
    Notifier, RequestExecutor, RequestOp, Services, TaskRef, TaskService, WorkflowOp,
    WorkflowService,
};
use workflow_events::store::memory::{MemoryBus, MemoryStore};
use workflow_events::store::EventStore;

/// A fixed reference instant.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn minutes(n: i64) -> chrono::Duration {
    chrono::Duration::minutes(n)
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap()
}

/// Records every collaborator call; failures are switched on per test.
#[derive(Default)]
pub struct FakeGateway {
    /// Notification sends still to fail; `usize::MAX` fails forever.
    notify_failures: AtomicUsize,
    notify_delay: Mutex<Duration>,
    pub sent: Mutex<Vec<Value>>,
    pub notify_calls: AtomicUsize,

    fail_requests: AtomicUsize,
    pub executed: Mutex<Vec<RequestOp>>,
    records: Mutex<HashMap<String, HashMap<String, Value>>>,
    reject_delete_of: Mutex<Option<String>>,
    pub fetch_calls: Mutex<Vec<Vec<String>>>,
    pub delete_calls: Mutex<Vec<Vec<String>>>,

    pub directory_ops: Mutex<Vec<DirectoryOp>>,
    pub workflow_ops: Mutex<Vec<(Uuid, WorkflowOp)>>,

    tasks: Mutex<HashMap<Uuid, TaskRef>>,
    pub meta_updates: Mutex<Vec<(Uuid, Map<String, Value>, Vec<String>)>>,
    pub cancelled_tasks: Mutex<Vec<(Uuid, Vec<Uuid>)>>,

    pub actions: Mutex<Vec<ActionRequest>>,
    pub alerts: Mutex<Vec<(Vec<String>, AlertContext)>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_notifications(&self, times: usize) {
        self.notify_failures.store(times, Ordering::SeqCst);
    }

    pub fn slow_notifications(&self, delay: Duration) {
        *lock(&self.notify_delay) = delay;
    }

    pub fn fail_requests(&self, times: usize) {
        self.fail_requests.store(times, Ordering::SeqCst);
    }

    pub fn put_records(&self, register: &str, ids: impl IntoIterator<Item = String>) {
        let mut records = lock(&self.records);
        let table = records.entry(register.to_string()).or_default();
        for id in ids {
            table.insert(id.clone(), json!({ "id": id }));
        }
    }

    pub fn record_ids(&self, register: &str) -> HashSet<String> {
        lock(&self.records)
            .get(register)
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Reject the delete chunk containing `id`.
    pub fn reject_delete_of(&self, id: &str) {
        *lock(&self.reject_delete_of) = Some(id.to_string());
    }

    pub fn put_task(&self, task: TaskRef) {
        lock(&self.tasks).insert(task.id, task);
    }

    pub fn alert_count(&self) -> usize {
        lock(&self.alerts).len()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl Notifier for FakeGateway {
    async fn send(&self, options: &Value) -> Result<Value> {
        self.notify_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.notify_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.notify_failures) {
            return Err(Error::action("notify", "smtp unavailable"));
        }
        lock(&self.sent).push(options.clone());
        Ok(json!({ "delivered": true }))
    }
}

#[async_trait]
impl RequestExecutor for FakeGateway {
    async fn execute(&self, op: &RequestOp) -> Result<Value> {
        lock(&self.executed).push(op.clone());
        if Self::take_failure(&self.fail_requests) {
            return Err(Error::action(op.name(), "register offline"));
        }
        match op {
            RequestOp::DocumentSave { .. } => {
                Ok(json!({ "id": "7b0d3c52-0b7e-4d59-9a0e-4c4c2f1b8a11" }))
            }
            other => Ok(json!({ "ok": other.name() })),
        }
    }

    async fn fetch_records(&self, register: &str, ids: &[String]) -> Result<Vec<Value>> {
        lock(&self.fetch_calls).push(ids.to_vec());
        let records = lock(&self.records);
        let Some(table) = records.get(register) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| table.get(id).cloned()).collect())
    }

    async fn delete_records(&self, register: &str, ids: &[String]) -> Result<()> {
        lock(&self.delete_calls).push(ids.to_vec());
        if let Some(rejected) = lock(&self.reject_delete_of).as_ref() {
            if ids.contains(rejected) {
                return Err(Error::action("delete", format!("record {rejected} is locked")));
            }
        }
        if let Some(table) = lock(&self.records).get_mut(register) {
            for id in ids {
                table.remove(id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryExecutor for FakeGateway {
    async fn apply(&self, op: &DirectoryOp) -> Result<Value> {
        lock(&self.directory_ops).push(op.clone());
        Ok(json!({ "selector": op.selector }))
    }
}

#[async_trait]
impl WorkflowService for FakeGateway {
    async fn apply(&self, origin_workflow_id: Uuid, op: &WorkflowOp) -> Result<Value> {
        lock(&self.workflow_ops).push((origin_workflow_id, op.clone()));
        Ok(json!({ "applied": true }))
    }
}

#[async_trait]
impl TaskService for FakeGateway {
    async fn get_task(&self, task_id: Uuid) -> Result<TaskRef> {
        lock(&self.tasks)
            .get(&task_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))
    }

    async fn update_meta(
        &self,
        task_id: Uuid,
        set: &Map<String, Value>,
        delete: &[String],
    ) -> Result<Value> {
        lock(&self.meta_updates).push((task_id, set.clone(), delete.to_vec()));
        Ok(Value::Object(set.clone()))
    }

    async fn cancel_tasks(&self, workflow_id: Uuid, task_template_ids: &[Uuid]) -> Result<u64> {
        lock(&self.cancelled_tasks).push((workflow_id, task_template_ids.to_vec()));
        Ok(task_template_ids.len() as u64)
    }
}

#[async_trait]
impl ActionExecutor for FakeGateway {
    async fn execute(&self, request: &ActionRequest) -> Result<Value> {
        lock(&self.actions).push(request.clone());
        Ok(json!({ "executed": request.kind }))
    }
}

#[async_trait]
impl Alerting for FakeGateway {
    async fn send_emails(&self, subscribers: &[String], context: &AlertContext) -> Result<()> {
        lock(&self.alerts).push((subscribers.to_vec(), context.clone()));
        Ok(())
    }
}

pub fn services(gateway: &Arc<FakeGateway>) -> Services {
    Services::from_gateway(Arc::new(TemplateEvaluator), Arc::clone(gateway))
}

pub fn workflow(data: Value) -> Workflow {
    Workflow {
        id: Uuid::new_v4(),
        workflow_template_id: None,
        status: None,
        has_unresolved_errors: false,
        data,
        created_at: t0(),
        updated_at: t0(),
    }
}

pub fn document(workflow_id: Uuid, data: Value) -> Document {
    Document {
        id: Uuid::new_v4(),
        workflow_id,
        task_id: None,
        data,
        attachments: Vec::new(),
        created_at: t0(),
    }
}

/// A pending event row, as the ingress pipeline would have left it.
pub fn pending_event(
    workflow_id: Uuid,
    kind: EventKind,
    due_date: Option<DateTime<Utc>>,
) -> Event {
    Event {
        id: Uuid::new_v4(),
        workflow_id,
        event_template_id: Uuid::new_v4(),
        kind,
        name: format!("{kind} event"),
        done: false,
        result: json!({}),
        scheduling: SchedulingState::default(),
        document_id: None,
        due_date,
        version: 1,
        lock_id: None,
        locked_at: None,
        created_at: t0(),
        updated_at: t0(),
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub bus: Arc<MemoryBus>,
    pub gateway: Arc<FakeGateway>,
    pub pipeline: IngressPipeline,
    pub daemon: Daemon,
    pub workflow_id: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limits(RequestLimits::default())
    }

    pub fn with_limits(limits: RequestLimits) -> Self {
        Self::build(SchedulerConfig::default(), limits, json!({}))
    }

    pub fn with_workflow_data(data: Value) -> Self {
        Self::build(SchedulerConfig::default(), RequestLimits::default(), data)
    }

    pub fn build(scheduler: SchedulerConfig, limits: RequestLimits, data: Value) -> Self {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let gateway = FakeGateway::new();
        let services = services(&gateway);

        let wf = workflow(data);
        let workflow_id = wf.id;
        store.put_workflow(wf);

        let failures = FailureReporter::new(
            store.clone(),
            services.alerting.clone(),
            vec!["ops@example.com".to_string()],
        );
        let pipeline = IngressPipeline::new(
            store.clone(),
            bus.clone(),
            &services,
            failures.clone(),
            &scheduler,
            limits,
        );
        let daemon = Daemon::new(
            store.clone(),
            bus.clone(),
            services.notifier.clone(),
            failures,
            scheduler,
        );

        Self {
            store,
            bus,
            gateway,
            pipeline,
            daemon,
            workflow_id,
        }
    }

    /// Register a template and return its id.
    pub fn template(&self, kind: EventKind, schema: Value) -> Uuid {
        self.template_with_rules(kind, schema, Vec::new())
    }

    pub fn template_with_rules(
        &self,
        kind: EventKind,
        schema: Value,
        status_rules: Vec<StatusRule>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.store.put_template(EventTemplate {
            id,
            name: format!("{kind} template"),
            kind,
            schema: schema.to_string(),
            status_rules,
        });
        id
    }

    pub fn trigger(&self, event_template_id: Uuid) -> TriggerMessage {
        TriggerMessage::new(self.workflow_id, event_template_id)
    }

    /// Seed `n` finished events for a template, as earlier runs would have.
    pub async fn seed_events(&self, event_template_id: Uuid, n: usize) {
        for _ in 0..n {
            self.store
                .insert_event(NewEvent {
                    workflow_id: self.workflow_id,
                    event_template_id,
                    kind: EventKind::Request,
                    name: "earlier".to_string(),
                    done: true,
                    result: json!({}),
                    scheduling: SchedulingState::default(),
                    document_id: None,
                    due_date: None,
                })
                .await
                .unwrap();
        }
    }

    pub fn events_for(&self, event_template_id: Uuid) -> Vec<Event> {
        self.store
            .events()
            .into_iter()
            .filter(|e| e.event_template_id == event_template_id)
            .collect()
    }

    pub fn workflow(&self) -> Workflow {
        self.store.workflow(self.workflow_id).unwrap()
    }
}
