//! Daemon tick behaviour over the in-memory store.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{Harness, minutes, t0};
use serde_json::json;
use workflow_events::config::{RequestLimits, SchedulerConfig};
use workflow_events::engine::TickReport;
use workflow_events::model::{EventKind, Severity};

#[tokio::test]
async fn delay_completes_once_due() {
    let h = Harness::new();
    let tpl = h.template(EventKind::Delay, json!({ "delay": "5m" }));
    h.pipeline.handle_at(&h.trigger(tpl), t0()).await;

    let early = h.daemon.tick_at(t0() + minutes(4)).await;
    assert_eq!(early.delays_claimed, 0);
    assert!(!h.events_for(tpl)[0].done);

    let due = h.daemon.tick_at(t0() + minutes(5)).await;
    assert_eq!(due.delays_claimed, 1);
    assert_eq!(due.delays_completed, 1);

    let event = &h.events_for(tpl)[0];
    assert!(event.done);
    assert!(event.lock_id.is_none());
    assert_eq!(event.scheduling.statuses[&(t0() + minutes(5))], "done");

    let completions = h.bus.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].event_id, event.id);

    let again = h.daemon.tick_at(t0() + minutes(6)).await;
    assert_eq!(again, TickReport::default());
}

#[tokio::test]
async fn notification_resends_follow_the_ladder_then_park() {
    let h = Harness::new();
    h.gateway.fail_notifications(usize::MAX);
    let tpl = h.template(
        EventKind::Notification,
        json!({ "notification": { "to": "x@example.com", "onErrorTryResendAfter": ["5m", "1h"] } }),
    );
    h.pipeline.handle_at(&h.trigger(tpl), t0()).await;

    let second = h.daemon.tick_at(t0() + minutes(5)).await;
    assert_eq!(second.notifications_claimed, 1);
    assert_eq!(second.notifications_postponed, 1);
    let event = &h.events_for(tpl)[0];
    assert_eq!(event.due_date, Some(t0() + minutes(60)));
    assert!(event.lock_id.is_none());

    // Not due yet: nothing to claim.
    let between = h.daemon.tick_at(t0() + minutes(30)).await;
    assert_eq!(between.notifications_claimed, 0);

    let last = h.daemon.tick_at(t0() + minutes(60)).await;
    assert_eq!(last.notifications_exhausted, 1);

    let event = &h.events_for(tpl)[0];
    assert!(event.is_parked());
    assert!(!event.done);
    let attempts: Vec<_> = event.scheduling.statuses.keys().copied().collect();
    assert_eq!(attempts, vec![t0(), t0() + minutes(5), t0() + minutes(60)]);
    assert!(event.scheduling.statuses.values().all(|s| s.starts_with("error")));
    assert_eq!(h.gateway.notify_calls.load(std::sync::atomic::Ordering::SeqCst), 3);

    let errors = h.store.workflow_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].severity, Severity::Error);
    assert_eq!(errors[0].event_id, Some(event.id));
    assert!(h.workflow().has_unresolved_errors);
    assert!(h.bus.completions().is_empty());

    // Parked events are never claimed again.
    let after = h.daemon.tick_at(t0() + minutes(24 * 60)).await;
    assert_eq!(after.notifications_claimed, 0);
}

#[tokio::test]
async fn notification_recovers_on_resend() {
    let h = Harness::new();
    h.gateway.fail_notifications(1);
    let tpl = h.template(
        EventKind::Notification,
        json!({ "notification": { "to": "x@example.com", "onErrorTryResendAfter": ["5m", "1h"] } }),
    );
    h.pipeline.handle_at(&h.trigger(tpl), t0()).await;

    let report = h.daemon.tick_at(t0() + minutes(5)).await;
    assert_eq!(report.notifications_sent, 1);

    let event = &h.events_for(tpl)[0];
    assert!(event.done);
    assert!(event.scheduling.due_dates.is_empty());
    assert_eq!(event.scheduling.statuses[&(t0() + minutes(5))], "sent");
    assert_eq!(
        h.gateway.sent.lock().unwrap().clone(),
        vec![json!({ "to": "x@example.com" })]
    );
    assert_eq!(h.bus.completions().len(), 1);
    assert!(h.store.workflow_errors().is_empty());
}

#[tokio::test]
async fn tick_reaps_stale_claims() {
    let h = Harness::new();
    let tpl = h.template(EventKind::Delay, json!({ "delay": "1m" }));
    h.pipeline.handle_at(&h.trigger(tpl), t0()).await;

    // A claim taken by a crashed worker.
    let stuck = h
        .daemon
        .claimer()
        .claim(EventKind::Delay, t0() + minutes(1))
        .await
        .unwrap();
    assert_eq!(stuck.events.len(), 1);

    let soon = h.daemon.tick_at(t0() + minutes(30)).await;
    assert_eq!(soon.reaped, 0);
    assert_eq!(soon.delays_claimed, 0);

    let later = h.daemon.tick_at(t0() + minutes(62)).await;
    assert_eq!(later.reaped, 1);

    let recovered = h.daemon.tick_at(t0() + minutes(63)).await;
    assert_eq!(recovered.delays_completed, 1);
    assert!(h.events_for(tpl)[0].done);
}

#[tokio::test(start_paused = true)]
async fn overlapping_tick_is_skipped() {
    let h = Harness::new();
    h.gateway.fail_notifications(1);
    let tpl = h.template(
        EventKind::Notification,
        json!({ "notification": { "to": "x@example.com", "onErrorTryResendAfter": ["5m"] } }),
    );
    h.pipeline.handle_at(&h.trigger(tpl), t0()).await;
    h.gateway.slow_notifications(Duration::from_secs(30));

    let now = t0() + minutes(5);
    let (first, second) = tokio::join!(h.daemon.try_tick(now), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.daemon.try_tick(now).await
    });

    let reports = [first, second];
    assert_eq!(reports.iter().filter(|r| r.is_none()).count(), 1);
    let ran = reports.iter().flatten().next().unwrap();
    assert_eq!(ran.notifications_sent, 1);

    // The guard is released once the tick finishes.
    assert!(h.daemon.try_tick(now).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_the_running_tick() {
    let h = Harness::new();
    h.gateway.fail_notifications(1);
    let note = h.template(
        EventKind::Notification,
        json!({ "notification": { "to": "x@example.com", "onErrorTryResendAfter": ["5m"] } }),
    );
    let delay = h.template(EventKind::Delay, json!({ "delay": "5m" }));
    h.pipeline.handle_at(&h.trigger(note), t0()).await;
    h.pipeline.handle_at(&h.trigger(delay), t0()).await;
    h.gateway.slow_notifications(Duration::from_secs(30));

    let daemon = h.daemon.clone();
    let running = tokio::spawn(async move { daemon.run().await });

    // First tick fires immediately and is now stuck in the slow resend.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.gateway.notify_calls.load(Ordering::SeqCst), 2);

    h.daemon.shutdown();
    running.await.unwrap().unwrap();

    for event in h.store.events() {
        assert!(event.done, "event {} left pending", event.id);
        assert!(event.lock_id.is_none(), "event {} still claimed", event.id);
    }
    assert_eq!(h.bus.completions().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn run_keeps_ticking_until_shutdown() {
    let scheduler = SchedulerConfig {
        poll_interval: Duration::from_secs(1),
        ..SchedulerConfig::default()
    };
    let h = Harness::build(scheduler, RequestLimits::default(), json!({}));

    let daemon = h.daemon.clone();
    let running = tokio::spawn(async move { daemon.run().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Triggered after the first tick, so a later tick has to pick it up.
    let tpl = h.template(EventKind::Delay, json!({ "delay": "5m" }));
    h.pipeline.handle_at(&h.trigger(tpl), t0()).await;
    assert!(!h.events_for(tpl)[0].done);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let event = &h.events_for(tpl)[0];
    assert!(event.done);
    assert!(event.lock_id.is_none());

    h.daemon.shutdown();
    running.await.unwrap().unwrap();
    assert_eq!(h.bus.completions().len(), 1);
}
