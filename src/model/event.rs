//! Event rows and the engine-owned scheduling state.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{Error, Result};

/// The closed set of event types a template can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Notification,
    Delay,
    Request,
    Stop,
    Unit,
    User,
    Workflow,
    Meta,
    Clear,
    File,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Notification,
        EventKind::Delay,
        EventKind::Request,
        EventKind::Stop,
        EventKind::Unit,
        EventKind::User,
        EventKind::Workflow,
        EventKind::Meta,
        EventKind::Clear,
        EventKind::File,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Notification => "notification",
            EventKind::Delay => "delay",
            EventKind::Request => "request",
            EventKind::Stop => "stop",
            EventKind::Unit => "unit",
            EventKind::User => "user",
            EventKind::Workflow => "workflow",
            EventKind::Meta => "meta",
            EventKind::Clear => "clear",
            EventKind::File => "file",
        }
    }

    /// Kinds whose rows the daemon picks up again after creation.
    pub fn is_schedulable(self) -> bool {
        matches!(self, EventKind::Delay | EventKind::Notification)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidSchema(format!("unknown event type: {s}")))
    }
}

/// Scheduler bookkeeping persisted alongside each event.
///
/// `due_dates` is consumed head-first; `statuses` keeps one entry per
/// delivery attempt keyed by the timestamp that attempt was scheduled for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingState {
    #[serde(default)]
    pub due_dates: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub statuses: BTreeMap<DateTime<Utc>, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_iterator: Option<u32>,
    /// Payload needed to replay a postponed delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl SchedulingState {
    /// Consume the head of `due_dates`, stamping `status` on it.
    ///
    /// Returns the next due date, or `None` once the list is exhausted.
    /// With an empty list the status is stamped at `now`.
    pub fn record_attempt(
        &mut self,
        now: DateTime<Utc>,
        status: impl Into<String>,
    ) -> Option<DateTime<Utc>> {
        let at = if self.due_dates.is_empty() {
            now
        } else {
            self.due_dates.remove(0)
        };
        self.statuses.insert(at, status.into());
        self.due_dates.first().copied()
    }
}

/// The JSON key an attempt at `at` is stored under in `statuses`; the same
/// spelling serde uses for `DateTime<Utc>`.
pub fn status_key(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// A persisted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub event_template_id: Uuid,
    pub kind: EventKind,
    pub name: String,
    pub done: bool,
    /// Handler-owned result bag, keyed by action name.
    pub result: serde_json::Value,
    pub scheduling: SchedulingState,
    pub document_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
    pub version: i32,
    pub lock_id: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Eligible for a claim at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        !self.done && self.lock_id.is_none() && self.due_date.is_some_and(|due| due <= now)
    }

    /// Stuck without a due date: either never scheduled or out of resends.
    pub fn is_parked(&self) -> bool {
        !self.done && self.due_date.is_none() && self.lock_id.is_none()
    }
}

/// Parameters for inserting a new event row.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub workflow_id: Uuid,
    pub event_template_id: Uuid,
    pub kind: EventKind,
    pub name: String,
    pub done: bool,
    pub result: serde_json::Value,
    pub scheduling: SchedulingState,
    pub document_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
}
