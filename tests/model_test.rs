use chrono::{TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;
use workflow_events::model::{
    EventKind, EventTemplate, RetryEnvelope, SchedulingState, TriggerMessage, status_key,
};

#[test]
fn event_kind_parses_and_displays() {
    for kind in EventKind::ALL {
        assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        assert_eq!(kind.to_string(), kind.as_str());
    }
    assert!("webhook".parse::<EventKind>().is_err());
    assert!(EventKind::Delay.is_schedulable());
    assert!(EventKind::Notification.is_schedulable());
    assert!(!EventKind::Request.is_schedulable());
}

#[test]
fn trigger_message_uses_camel_case_on_the_wire() {
    let workflow_id = Uuid::new_v4();
    let template_id = Uuid::new_v4();

    let parsed: TriggerMessage = serde_json::from_value(json!({
        "workflowId": workflow_id,
        "eventTemplateId": template_id,
        "onlyExecute": true,
        "retryIterator": 2
    }))
    .unwrap();
    assert_eq!(parsed.workflow_id, workflow_id);
    assert!(parsed.only_execute);
    assert_eq!(parsed.attempt(), 2);
    assert!(parsed.debug_id.is_none());

    let minimal = serde_json::to_value(TriggerMessage::new(workflow_id, template_id)).unwrap();
    assert_eq!(
        minimal,
        json!({ "workflowId": workflow_id, "eventTemplateId": template_id })
    );
}

#[test]
fn retry_envelope_carries_the_next_iterator() {
    let message = TriggerMessage::new(Uuid::new_v4(), Uuid::new_v4()).only_execute();
    let envelope = RetryEnvelope {
        message: message.clone(),
        retry_iterator: 1,
        delay: std::time::Duration::from_secs(60),
    };

    let wire = envelope.to_wire();
    assert_eq!(wire.retry_iterator, Some(1));
    assert!(wire.only_execute);
    assert_eq!(wire.event_template_id, message.event_template_id);
}

#[test]
fn record_attempt_consumes_due_dates_head_first() {
    let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    let t1 = t0 + chrono::Duration::minutes(5);
    let mut state = SchedulingState {
        due_dates: vec![t0, t1],
        ..SchedulingState::default()
    };

    assert_eq!(state.record_attempt(t0, "error: down"), Some(t1));
    assert_eq!(state.record_attempt(t1, "error: down"), None);
    assert!(state.due_dates.is_empty());
    assert_eq!(state.statuses.len(), 2);

    let mut empty = SchedulingState::default();
    assert_eq!(empty.record_attempt(t0, "sent"), None);
    assert_eq!(empty.statuses[&t0], "sent");
}

#[test]
fn template_settings_read_literal_keys() {
    let allowed = Uuid::new_v4();
    let template = EventTemplate {
        id: Uuid::new_v4(),
        name: "remind".to_string(),
        kind: EventKind::Notification,
        schema: json!({
            "retryIfError": ["1m", "5m"],
            "notFailOnError": true,
            "onErrorTryResendAfter": ["1h"],
            "metaAllowedTemplates": [allowed],
            "notification": { "to": "${workflow.data.email}" }
        })
        .to_string(),
        status_rules: Vec::new(),
    };

    let settings = template.settings().unwrap();
    assert_eq!(
        settings.retry_if_error.delay_for(1),
        Some(std::time::Duration::from_secs(300))
    );
    assert!(settings.not_fail_on_error);
    assert_eq!(settings.resend_after, vec![std::time::Duration::from_secs(3600)]);
    assert!(settings.meta_allowed_templates.contains(&allowed));
}

#[test]
fn malformed_template_schema_is_rejected() {
    let template = EventTemplate {
        id: Uuid::new_v4(),
        name: "broken".to_string(),
        kind: EventKind::Delay,
        schema: "{ not json".to_string(),
        status_rules: Vec::new(),
    };
    assert!(template.settings().is_err());
}

#[test]
fn status_keys_match_serialized_timestamps() {
    let whole = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    let fractional = whole + chrono::Duration::milliseconds(250);
    let mut state = SchedulingState::default();
    state.statuses.insert(whole, "sent".to_string());
    state.statuses.insert(fractional, "error".to_string());

    let wire = serde_json::to_value(&state).unwrap();
    let statuses = wire["statuses"].as_object().unwrap();

    assert!(statuses.contains_key(&status_key(whole)));
    assert!(statuses.contains_key(&status_key(fractional)));
    assert_eq!(status_key(whole), "2026-03-02T09:00:00Z");
}
