//! # workflow-events
//!
//! Event scheduling and dispatch for a workflow engine.
//!
//! Triggers arrive on a pgmq queue and run through the ingress pipeline,
//! which evaluates the event template, dispatches to one of the per-type
//! handlers and records the outcome. A daemon loop completes due delay
//! events and replays postponed notifications, claiming rows with an
//! atomic compare-and-set so concurrent workers never share one.

pub mod actions;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod schedule;
pub mod services;
pub mod store;
pub mod telemetry;
