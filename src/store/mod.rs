//! Persistence and messaging seams used by the engine.
//!
//! `db::Db` implements both traits against Postgres and pgmq;
//! [`memory::MemoryStore`] and [`memory::MemoryBus`] keep everything in
//! process for tests and dry runs.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    Completion, Event, EventKind, EventTemplate, NewEvent, NewWorkflowError, RetryEnvelope,
    SchedulingState, WorkflowDebug, WorkflowError, WorkflowSnapshot,
};

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Number of events already recorded for a (workflow, template) pair.
    async fn count_events(&self, workflow_id: Uuid, event_template_id: Uuid) -> Result<i64>;

    async fn get_template(&self, id: Uuid) -> Result<EventTemplate>;

    /// Workflow row plus its events (creation order) and documents.
    async fn load_snapshot(&self, workflow_id: Uuid) -> Result<WorkflowSnapshot>;

    async fn get_event(&self, id: Uuid) -> Result<Event>;

    async fn insert_event(&self, new: NewEvent) -> Result<Event>;

    /// Stamp `token` on every unclaimed, not-done event of `kind` due at
    /// `now`, then return exactly the rows bearing the token.
    ///
    /// The stamping is a single compare-and-set over `lock_id IS NULL`;
    /// concurrent callers never receive the same row.
    async fn claim_due(&self, kind: EventKind, token: Uuid, now: DateTime<Utc>)
    -> Result<Vec<Event>>;

    /// Mark a claimed event done and release its claim.
    /// Fails with `Error::ClaimLost` if `token` no longer holds the row.
    async fn complete_claimed(
        &self,
        id: Uuid,
        token: Uuid,
        scheduling: &SchedulingState,
    ) -> Result<()>;

    /// Release a claim, leaving the event pending at `due_date`
    /// (`None` parks it for manual triage).
    async fn reschedule_claimed(
        &self,
        id: Uuid,
        token: Uuid,
        scheduling: &SchedulingState,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Clear claims taken before `cutoff` on events that never finished.
    async fn reap_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Mark pending events of the given templates done without completion.
    async fn cancel_pending_events(&self, workflow_id: Uuid, template_ids: &[Uuid]) -> Result<u64>;

    async fn insert_workflow_error(&self, new: NewWorkflowError) -> Result<WorkflowError>;

    async fn list_workflow_errors(
        &self,
        workflow_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<WorkflowError>>;

    async fn insert_workflow_debug(&self, debug: WorkflowDebug) -> Result<()>;

    async fn flag_unresolved_errors(&self, workflow_id: Uuid) -> Result<()>;

    async fn set_workflow_status(&self, workflow_id: Uuid, status: &str) -> Result<()>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Put a failed trigger back on the ingress queue after its delay.
    async fn requeue(&self, envelope: &RetryEnvelope) -> Result<()>;

    /// Tell the workflow manager an event is done.
    async fn publish_completion(&self, completion: &Completion) -> Result<()>;
}
