//! The scheduling daemon.
//!
//! Every `poll_interval` it runs one tick:
//! - delay pass: claim due delay events, mark them done, emit completions,
//!   then release stale claims;
//! - notification pass: claim due postponed notifications and replay them.
//!
//! A tick that is still running when the next one fires causes that next
//! one to be skipped, never stacked. Shutdown waits for the running tick so
//! its claims are settled before `run` returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use super::alerting::{Failure, FailureReporter};
use super::claimer::Claimer;
use crate::actions::notification::{Redelivery, redeliver};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::model::{Completion, Event, EventKind};
use crate::services::Notifier;
use crate::store::{EventStore, MessageBus};
use crate::telemetry::event::start_tick_span;
use crate::telemetry::metrics;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub delays_claimed: usize,
    pub delays_completed: usize,
    pub notifications_claimed: usize,
    pub notifications_sent: usize,
    pub notifications_postponed: usize,
    pub notifications_exhausted: usize,
    pub reaped: u64,
    /// Per-event failures that were logged and skipped.
    pub errors: usize,
}

pub struct Daemon {
    store: Arc<dyn EventStore>,
    bus: Arc<dyn MessageBus>,
    notifier: Arc<dyn Notifier>,
    claimer: Arc<Claimer>,
    failures: FailureReporter,
    config: SchedulerConfig,
    shutdown: Arc<Notify>,
    busy: Arc<AtomicBool>,
}

impl Clone for Daemon {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            bus: Arc::clone(&self.bus),
            notifier: Arc::clone(&self.notifier),
            claimer: Arc::clone(&self.claimer),
            failures: self.failures.clone(),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
            busy: Arc::clone(&self.busy),
        }
    }
}

/// Clears the busy flag when a tick finishes, even if it unwinds.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Daemon {
    pub fn new(
        store: Arc<dyn EventStore>,
        bus: Arc<dyn MessageBus>,
        notifier: Arc<dyn Notifier>,
        failures: FailureReporter,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            claimer: Arc::new(Claimer::new(Arc::clone(&store), config.stale_lock_after)),
            store,
            bus,
            notifier,
            failures,
            config,
            shutdown: Arc::new(Notify::new()),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal the daemon loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub fn claimer(&self) -> &Claimer {
        &self.claimer
    }

    /// Tick every `poll_interval` until shutdown, then wait out the last tick.
    pub async fn run(&self) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.config.poll_interval.as_millis() as u64, "daemon started");

        let mut in_flight: Option<JoinHandle<Option<TickReport>>> = None;
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("daemon shutting down");
                    if let Some(tick) = in_flight.take() {
                        info!("waiting for in-flight tick");
                        if let Err(e) = tick.await {
                            error!(error = %e, "in-flight tick did not finish cleanly");
                        }
                    }
                    return Ok(());
                }
                _ = interval.tick() => {
                    if in_flight.as_ref().is_some_and(|tick| !tick.is_finished()) {
                        warn!("previous tick still running, skipping");
                        continue;
                    }
                    let daemon = self.clone();
                    in_flight = Some(tokio::spawn(async move {
                        daemon.try_tick(Utc::now()).await
                    }));
                }
            }
        }
    }

    /// Run one tick unless another is still in flight.
    pub async fn try_tick(&self, now: DateTime<Utc>) -> Option<TickReport> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("previous tick still running, skipping");
            return None;
        }
        let _guard = BusyGuard(Arc::clone(&self.busy));
        Some(self.tick_at(now).await)
    }

    /// One full tick at `now`, ignoring the overlap guard.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        self.delay_pass(now, &mut report).await;
        self.notification_pass(now, &mut report).await;
        if report != TickReport::default() {
            info!(report = %json!(report), "tick finished");
        }
        report
    }

    async fn delay_pass(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let started = Instant::now();
        match self.claimer.claim(EventKind::Delay, now).await {
            Ok(claim) => {
                let span = start_tick_span("delay", &claim.token);
                span.record("claim.count", claim.events.len());
                report.delays_claimed = claim.events.len();
                async {
                    for event in &claim.events {
                        match self.complete_delay(event, claim.token, now).await {
                            Ok(()) => report.delays_completed += 1,
                            Err(e) => {
                                report.errors += 1;
                                error!(event_id = %event.id, error = %e, "failed to complete delay event");
                            }
                        }
                    }
                }
                .instrument(span)
                .await;
            }
            Err(e) => {
                report.errors += 1;
                error!(error = %e, "delay claim failed");
            }
        }

        match self.claimer.reap(now).await {
            Ok(reaped) => report.reaped = reaped,
            Err(e) => {
                report.errors += 1;
                error!(error = %e, "stale claim reaper failed");
            }
        }
        record_duration("delay", started);
    }

    async fn complete_delay(
        &self,
        event: &Event,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut scheduling = event.scheduling.clone();
        scheduling.statuses.insert(now, "done".to_string());
        self.store
            .complete_claimed(event.id, token, &scheduling)
            .await?;
        self.bus
            .publish_completion(&Completion {
                workflow_id: event.workflow_id,
                event_id: event.id,
            })
            .await
    }

    async fn notification_pass(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let started = Instant::now();
        let claim = match self.claimer.claim(EventKind::Notification, now).await {
            Ok(claim) => claim,
            Err(e) => {
                report.errors += 1;
                error!(error = %e, "notification claim failed");
                return;
            }
        };
        let span = start_tick_span("notification", &claim.token);
        span.record("claim.count", claim.events.len());
        report.notifications_claimed = claim.events.len();

        async {
            for event in &claim.events {
                if let Err(e) = self.resend(event, claim.token, now, report).await {
                    report.errors += 1;
                    error!(event_id = %event.id, error = %e, "notification resend bookkeeping failed");
                }
            }
        }
        .instrument(span)
        .await;
        record_duration("notification", started);
    }

    async fn resend(
        &self,
        event: &Event,
        token: Uuid,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        match redeliver(self.notifier.as_ref(), event, now).await {
            Redelivery::Sent { scheduling } => {
                self.store
                    .complete_claimed(event.id, token, &scheduling)
                    .await?;
                self.bus
                    .publish_completion(&Completion {
                        workflow_id: event.workflow_id,
                        event_id: event.id,
                    })
                    .await?;
                report.notifications_sent += 1;
            }
            Redelivery::Postponed { scheduling, next } => {
                self.store
                    .reschedule_claimed(event.id, token, &scheduling, Some(next))
                    .await?;
                report.notifications_postponed += 1;
            }
            Redelivery::Exhausted { scheduling, cause } => {
                self.store
                    .reschedule_claimed(event.id, token, &scheduling, None)
                    .await?;
                report.notifications_exhausted += 1;
                error!(event_id = %event.id, %cause, "notification parked");
                drop(
                    self.failures
                        .hard(Failure {
                            workflow_id: event.workflow_id,
                            event_template_id: Some(event.event_template_id),
                            event_id: Some(event.id),
                            message: json!({
                                "workflowId": event.workflow_id,
                                "eventTemplateId": event.event_template_id,
                            }),
                            cause,
                        })
                        .await,
                );
            }
        }
        Ok(())
    }
}

fn record_duration(pass: &'static str, started: Instant) {
    metrics::tick_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("pass", pass)],
    );
}
