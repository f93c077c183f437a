//! In-process store and bus.
//!
//! The claim is emulated the way Postgres executes it: one locked pass
//! that stamps the token where `lock_id` is unset, then a separate read of
//! the rows bearing that token.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{EventStore, MessageBus};
use crate::error::{Error, Result};
use crate::model::{
    Completion, Document, Event, EventKind, EventTemplate, NewEvent, NewWorkflowError,
    RetryEnvelope, SchedulingState, Workflow, WorkflowDebug, WorkflowError, WorkflowSnapshot,
};

#[derive(Default)]
struct MemoryState {
    templates: HashMap<Uuid, EventTemplate>,
    workflows: HashMap<Uuid, Workflow>,
    documents: Vec<Document>,
    events: Vec<Event>,
    errors: Vec<WorkflowError>,
    debugs: Vec<WorkflowDebug>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put_template(&self, template: EventTemplate) {
        self.state().templates.insert(template.id, template);
    }

    pub fn put_workflow(&self, workflow: Workflow) {
        self.state().workflows.insert(workflow.id, workflow);
    }

    pub fn put_document(&self, document: Document) {
        self.state().documents.push(document);
    }

    /// Insert a fully-formed event row, bypassing the engine.
    pub fn put_event(&self, event: Event) {
        self.state().events.push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn workflow_errors(&self) -> Vec<WorkflowError> {
        self.state().errors.clone()
    }

    pub fn workflow_debugs(&self) -> Vec<WorkflowDebug> {
        self.state().debugs.clone()
    }

    pub fn workflow(&self, id: Uuid) -> Option<Workflow> {
        self.state().workflows.get(&id).cloned()
    }

    fn with_claimed<F>(&self, id: Uuid, token: Uuid, update: F) -> Result<()>
    where
        F: FnOnce(&mut Event),
    {
        let mut state = self.state();
        let event = state
            .events
            .iter_mut()
            .find(|e| e.id == id && e.lock_id == Some(token) && !e.done)
            .ok_or(Error::ClaimLost(id))?;
        update(event);
        event.lock_id = None;
        event.locked_at = None;
        event.version += 1;
        event.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn count_events(&self, workflow_id: Uuid, event_template_id: Uuid) -> Result<i64> {
        Ok(self
            .state()
            .events
            .iter()
            .filter(|e| e.workflow_id == workflow_id && e.event_template_id == event_template_id)
            .count() as i64)
    }

    async fn get_template(&self, id: Uuid) -> Result<EventTemplate> {
        self.state()
            .templates
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("event template {id}")))
    }

    async fn load_snapshot(&self, workflow_id: Uuid) -> Result<WorkflowSnapshot> {
        let state = self.state();
        let workflow = state
            .workflows
            .get(&workflow_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("workflow {workflow_id}")))?;
        Ok(WorkflowSnapshot {
            workflow,
            events: state
                .events
                .iter()
                .filter(|e| e.workflow_id == workflow_id)
                .cloned()
                .collect(),
            documents: state
                .documents
                .iter()
                .filter(|d| d.workflow_id == workflow_id)
                .cloned()
                .collect(),
        })
    }

    async fn get_event(&self, id: Uuid) -> Result<Event> {
        self.state()
            .events
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("event {id}")))
    }

    async fn insert_event(&self, new: NewEvent) -> Result<Event> {
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4(),
            workflow_id: new.workflow_id,
            event_template_id: new.event_template_id,
            kind: new.kind,
            name: new.name,
            done: new.done,
            result: new.result,
            scheduling: new.scheduling,
            document_id: new.document_id,
            due_date: new.due_date,
            version: 1,
            lock_id: None,
            locked_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state().events.push(event.clone());
        Ok(event)
    }

    async fn claim_due(
        &self,
        kind: EventKind,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        {
            let mut state = self.state();
            for event in state
                .events
                .iter_mut()
                .filter(|e| e.kind == kind && e.is_claimable(now))
            {
                event.lock_id = Some(token);
                event.locked_at = Some(now);
            }
        }
        Ok(self
            .state()
            .events
            .iter()
            .filter(|e| e.lock_id == Some(token) && !e.done)
            .cloned()
            .collect())
    }

    async fn complete_claimed(
        &self,
        id: Uuid,
        token: Uuid,
        scheduling: &SchedulingState,
    ) -> Result<()> {
        self.with_claimed(id, token, |event| {
            event.done = true;
            event.scheduling = scheduling.clone();
        })
    }

    async fn reschedule_claimed(
        &self,
        id: Uuid,
        token: Uuid,
        scheduling: &SchedulingState,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_claimed(id, token, |event| {
            event.scheduling = scheduling.clone();
            event.due_date = due_date;
        })
    }

    async fn reap_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut reaped = 0;
        for event in self.state().events.iter_mut().filter(|e| {
            !e.done
                && e.kind.is_schedulable()
                && e.lock_id.is_some()
                && e.locked_at.or(e.due_date).is_some_and(|at| at < cutoff)
        }) {
            event.lock_id = None;
            event.locked_at = None;
            reaped += 1;
        }
        Ok(reaped)
    }

    async fn cancel_pending_events(&self, workflow_id: Uuid, template_ids: &[Uuid]) -> Result<u64> {
        let now = Utc::now();
        let mut cancelled = 0;
        for event in self.state().events.iter_mut().filter(|e| {
            e.workflow_id == workflow_id && !e.done && template_ids.contains(&e.event_template_id)
        }) {
            event.done = true;
            event.due_date = None;
            event.lock_id = None;
            event.locked_at = None;
            event.scheduling.statuses.insert(now, "cancelled".to_string());
            event.updated_at = now;
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn insert_workflow_error(&self, new: NewWorkflowError) -> Result<WorkflowError> {
        let record = WorkflowError {
            id: Uuid::new_v4(),
            workflow_id: new.workflow_id,
            event_template_id: new.event_template_id,
            event_id: new.event_id,
            severity: new.severity,
            message: new.message,
            cause: new.cause,
            created_at: Utc::now(),
        };
        self.state().errors.push(record.clone());
        Ok(record)
    }

    async fn list_workflow_errors(
        &self,
        workflow_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<WorkflowError>> {
        Ok(self
            .state()
            .errors
            .iter()
            .rev()
            .filter(|e| workflow_id.is_none_or(|id| e.workflow_id == id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_workflow_debug(&self, debug: WorkflowDebug) -> Result<()> {
        self.state().debugs.push(debug);
        Ok(())
    }

    async fn flag_unresolved_errors(&self, workflow_id: Uuid) -> Result<()> {
        let mut state = self.state();
        let workflow = state
            .workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| Error::NotFound(format!("workflow {workflow_id}")))?;
        workflow.has_unresolved_errors = true;
        workflow.updated_at = Utc::now();
        Ok(())
    }

    async fn set_workflow_status(&self, workflow_id: Uuid, status: &str) -> Result<()> {
        let mut state = self.state();
        let workflow = state
            .workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| Error::NotFound(format!("workflow {workflow_id}")))?;
        workflow.status = Some(status.to_string());
        workflow.updated_at = Utc::now();
        Ok(())
    }
}

/// Records every requeue and completion instead of sending it.
#[derive(Default)]
pub struct MemoryBus {
    requeued: Mutex<Vec<RetryEnvelope>>,
    completions: Mutex<Vec<Completion>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requeued(&self) -> Vec<RetryEnvelope> {
        self.requeued
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn completions(&self) -> Vec<Completion> {
        self.completions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn requeue(&self, envelope: &RetryEnvelope) -> Result<()> {
        self.requeued
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(envelope.clone());
        Ok(())
    }

    async fn publish_completion(&self, completion: &Completion) -> Result<()> {
        self.completions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(completion.clone());
        Ok(())
    }
}
