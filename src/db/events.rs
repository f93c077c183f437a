//! Event store over Postgres: event rows, claims, audit records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::*;
use crate::store::EventStore;

const EVENT_COLUMNS: &str = "id, workflow_id, event_template_id, event_type, name, done, result, scheduling, document_id, due_date, version, lock_id, locked_at, created_at, updated_at";

#[async_trait]
impl EventStore for super::Db {
    async fn count_events(&self, workflow_id: Uuid, event_template_id: Uuid) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM events WHERE workflow_id = $1 AND event_template_id = $2",
        )
        .bind(workflow_id)
        .bind(event_template_id)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    async fn get_template(&self, id: Uuid) -> Result<EventTemplate> {
        let row: Option<TemplateRow> = sqlx::query_as(
            "SELECT id, name, event_type, schema, status_rules FROM event_templates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.ok_or_else(|| Error::NotFound(format!("event template {id}")))?
            .try_into_template()
    }

    async fn load_snapshot(&self, workflow_id: Uuid) -> Result<WorkflowSnapshot> {
        let workflow: Option<WorkflowRow> = sqlx::query_as(
            "SELECT id, workflow_template_id, status, has_unresolved_errors, data, created_at, updated_at
             FROM workflows WHERE id = $1",
        )
        .bind(workflow_id)
        .fetch_optional(self.pool())
        .await?;
        let workflow: Workflow = workflow
            .ok_or_else(|| Error::NotFound(format!("workflow {workflow_id}")))?
            .into();

        let events: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE workflow_id = $1 ORDER BY created_at, id"
        ))
        .bind(workflow_id)
        .fetch_all(self.pool())
        .await?;

        let documents: Vec<DocumentRow> = sqlx::query_as(
            "SELECT id, workflow_id, task_id, data, attachments, created_at
             FROM documents WHERE workflow_id = $1 ORDER BY created_at",
        )
        .bind(workflow_id)
        .fetch_all(self.pool())
        .await?;

        Ok(WorkflowSnapshot {
            workflow,
            events: events
                .into_iter()
                .map(EventRow::try_into_event)
                .collect::<Result<_>>()?,
            documents: documents.into_iter().map(Document::from).collect(),
        })
    }

    async fn get_event(&self, id: Uuid) -> Result<Event> {
        let row: Option<EventRow> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        row.ok_or_else(|| Error::NotFound(format!("event {id}")))?
            .try_into_event()
    }

    async fn insert_event(&self, new: NewEvent) -> Result<Event> {
        let row: EventRow = sqlx::query_as(&format!(
            "INSERT INTO events (id, workflow_id, event_template_id, event_type, name, done, result, scheduling, document_id, due_date)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.workflow_id)
        .bind(new.event_template_id)
        .bind(new.kind.as_str())
        .bind(&new.name)
        .bind(new.done)
        .bind(&new.result)
        .bind(Json(&new.scheduling))
        .bind(new.document_id)
        .bind(new.due_date)
        .fetch_one(self.pool())
        .await?;
        row.try_into_event()
    }

    async fn claim_due(
        &self,
        kind: EventKind,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        // Only rows with `lock_id IS NULL` match, so no two tokens land on one row.
        sqlx::query(
            "UPDATE events SET lock_id = $1, locked_at = $2, updated_at = $2
             WHERE event_type = $3 AND done = false AND due_date <= $2 AND lock_id IS NULL",
        )
        .bind(token)
        .bind(now)
        .bind(kind.as_str())
        .execute(self.pool())
        .await?;

        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE lock_id = $1 AND done = false ORDER BY due_date, created_at"
        ))
        .bind(token)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(EventRow::try_into_event).collect()
    }

    async fn complete_claimed(
        &self,
        id: Uuid,
        token: Uuid,
        scheduling: &SchedulingState,
    ) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE events SET done = true, scheduling = $3, lock_id = NULL, locked_at = NULL,
                    version = version + 1, updated_at = now()
             WHERE id = $1 AND lock_id = $2 AND done = false",
        )
        .bind(id)
        .bind(token)
        .bind(Json(scheduling))
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::ClaimLost(id));
        }
        Ok(())
    }

    async fn reschedule_claimed(
        &self,
        id: Uuid,
        token: Uuid,
        scheduling: &SchedulingState,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE events SET scheduling = $3, due_date = $4, lock_id = NULL, locked_at = NULL,
                    version = version + 1, updated_at = now()
             WHERE id = $1 AND lock_id = $2 AND done = false",
        )
        .bind(id)
        .bind(token)
        .bind(Json(scheduling))
        .bind(due_date)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::ClaimLost(id));
        }
        Ok(())
    }

    async fn reap_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE events SET lock_id = NULL, locked_at = NULL, updated_at = now()
             WHERE done = false AND lock_id IS NOT NULL
               AND event_type IN ('delay', 'notification')
               AND COALESCE(locked_at, due_date) < $1",
        )
        .bind(cutoff)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    async fn cancel_pending_events(&self, workflow_id: Uuid, template_ids: &[Uuid]) -> Result<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE events
             SET done = true, due_date = NULL, lock_id = NULL, locked_at = NULL,
                 scheduling = jsonb_set(scheduling, '{statuses}',
                     COALESCE(scheduling->'statuses', '{}'::jsonb) || jsonb_build_object($4::text, 'cancelled')),
                 version = version + 1, updated_at = $3
             WHERE workflow_id = $1 AND done = false AND event_template_id = ANY($2)",
        )
        .bind(workflow_id)
        .bind(template_ids)
        .bind(now)
        .bind(status_key(now))
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_workflow_error(&self, new: NewWorkflowError) -> Result<WorkflowError> {
        let row: WorkflowErrorRow = sqlx::query_as(
            "INSERT INTO workflow_errors (id, workflow_id, event_template_id, event_id, severity, message, cause)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id, workflow_id, event_template_id, event_id, severity, message, cause, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(new.workflow_id)
        .bind(new.event_template_id)
        .bind(new.event_id)
        .bind(new.severity.to_string())
        .bind(&new.message)
        .bind(&new.cause)
        .fetch_one(self.pool())
        .await?;
        row.try_into_error()
    }

    async fn list_workflow_errors(
        &self,
        workflow_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<WorkflowError>> {
        let rows: Vec<WorkflowErrorRow> = sqlx::query_as(
            "SELECT id, workflow_id, event_template_id, event_id, severity, message, cause, created_at
             FROM workflow_errors
             WHERE ($1::uuid IS NULL OR workflow_id = $1)
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(workflow_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(WorkflowErrorRow::try_into_error)
            .collect()
    }

    async fn insert_workflow_debug(&self, debug: WorkflowDebug) -> Result<()> {
        sqlx::query(
            "INSERT INTO workflow_debugs (id, workflow_id, event_template_id, calculated, result, error, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE
             SET calculated = EXCLUDED.calculated, result = EXCLUDED.result,
                 error = EXCLUDED.error, created_at = EXCLUDED.created_at",
        )
        .bind(debug.id)
        .bind(debug.workflow_id)
        .bind(debug.event_template_id)
        .bind(&debug.calculated)
        .bind(&debug.result)
        .bind(&debug.error)
        .bind(debug.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn flag_unresolved_errors(&self, workflow_id: Uuid) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE workflows SET has_unresolved_errors = true, updated_at = now() WHERE id = $1",
        )
        .bind(workflow_id)
        .execute(self.pool())
        .await?
        .rows_affected();
        if rows_affected == 0 {
            return Err(Error::NotFound(format!("workflow {workflow_id}")));
        }
        Ok(())
    }

    async fn set_workflow_status(&self, workflow_id: Uuid, status: &str) -> Result<()> {
        let rows_affected =
            sqlx::query("UPDATE workflows SET status = $2, updated_at = now() WHERE id = $1")
                .bind(workflow_id)
                .bind(status)
                .execute(self.pool())
                .await?
                .rows_affected();
        if rows_affected == 0 {
            return Err(Error::NotFound(format!("workflow {workflow_id}")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    workflow_id: Uuid,
    event_template_id: Uuid,
    event_type: String,
    name: String,
    done: bool,
    result: serde_json::Value,
    scheduling: Json<SchedulingState>,
    document_id: Option<Uuid>,
    due_date: Option<DateTime<Utc>>,
    version: i32,
    lock_id: Option<Uuid>,
    locked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EventRow {
    fn try_into_event(self) -> Result<Event> {
        Ok(Event {
            id: self.id,
            workflow_id: self.workflow_id,
            event_template_id: self.event_template_id,
            kind: self.event_type.parse()?,
            name: self.name,
            done: self.done,
            result: self.result,
            scheduling: self.scheduling.0,
            document_id: self.document_id,
            due_date: self.due_date,
            version: self.version,
            lock_id: self.lock_id,
            locked_at: self.locked_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: Uuid,
    name: String,
    event_type: String,
    schema: String,
    status_rules: Json<Vec<StatusRule>>,
}

impl TemplateRow {
    fn try_into_template(self) -> Result<EventTemplate> {
        Ok(EventTemplate {
            id: self.id,
            name: self.name,
            kind: self.event_type.parse()?,
            schema: self.schema,
            status_rules: self.status_rules.0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: Uuid,
    workflow_template_id: Option<Uuid>,
    status: Option<String>,
    has_unresolved_errors: bool,
    data: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WorkflowRow> for Workflow {
    fn from(row: WorkflowRow) -> Self {
        Self {
            id: row.id,
            workflow_template_id: row.workflow_template_id,
            status: row.status,
            has_unresolved_errors: row.has_unresolved_errors,
            data: row.data,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    workflow_id: Uuid,
    task_id: Option<Uuid>,
    data: serde_json::Value,
    attachments: Json<Vec<serde_json::Value>>,
    created_at: DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Self {
            id: row.id,
            workflow_id: row.workflow_id,
            task_id: row.task_id,
            data: row.data,
            attachments: row.attachments.0,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct WorkflowErrorRow {
    id: Uuid,
    workflow_id: Uuid,
    event_template_id: Option<Uuid>,
    event_id: Option<Uuid>,
    severity: String,
    message: serde_json::Value,
    cause: String,
    created_at: DateTime<Utc>,
}

impl WorkflowErrorRow {
    fn try_into_error(self) -> Result<WorkflowError> {
        Ok(WorkflowError {
            id: self.id,
            workflow_id: self.workflow_id,
            event_template_id: self.event_template_id,
            event_id: self.event_id,
            severity: self.severity.parse()?,
            message: self.message,
            cause: self.cause,
            created_at: self.created_at,
        })
    }
}
