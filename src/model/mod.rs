//! Core data model.
//!
//! An event is one execution of an event template inside a workflow. It
//! carries a handler-owned result bag and engine-owned scheduling state;
//! delay and postponed notification events are picked up again by the
//! daemon through their due date and claim token.

pub mod event;
pub mod message;
pub mod records;
pub mod template;

pub use event::{Event, EventKind, NewEvent, SchedulingState, status_key};
pub use message::{Completion, RetryEnvelope, TriggerMessage};
pub use records::{
    Document, NewWorkflowError, Severity, Workflow, WorkflowDebug, WorkflowError,
    WorkflowSnapshot,
};
pub use template::{EventTemplate, StatusRule, TemplateSettings};
