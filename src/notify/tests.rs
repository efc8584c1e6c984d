//! Cross-integration tests for the notify module.

use super::*;
use crate::alert::AlertStatus;
use crate::config::ReceiverConfig;
use crate::error::ConfigError;
use crate::notify::testing::{self, FakeMqtt, RecordingEmail, RecordingHttp};
use serde_json::{Value, json};
use serial_test::serial;

fn receiver(value: Value) -> ReceiverConfig {
    serde_json::from_value(value).unwrap()
}

/// One minimal, valid receiver per integration type.
fn every_kind(disable_resolve_message: bool) -> Vec<ReceiverConfig> {
    let entries = [
        ("webhook", json!({"url": "https://hooks.example.com/a"}), json!({})),
        ("email", json!({"addresses": "ops@example.com"}), json!({})),
        ("slack", json!({"url": "https://hooks.slack.com/services/T/B/X"}), json!({})),
        ("discord", json!({"url": "https://discord.com/api/webhooks/1/x"}), json!({})),
        ("teams", json!({"url": "https://outlook.office.com/webhook/x"}), json!({})),
        ("dooray", json!({"url": "https://hook.dooray.com/services/1/2/x"}), json!({})),
        ("telegram", json!({"chatid": "-100123"}), json!({"bottoken": "bot:1"})),
        ("line", json!({}), json!({"token": "line-1"})),
        (
            "threema",
            json!({"gateway_id": "*ABCDEFG", "recipient_id": "12345678"}),
            json!({"api_secret": "s"}),
        ),
        ("webex", json!({"room_id": "room-1"}), json!({"bot_token": "bot-1"})),
        ("victorops", json!({"url": "https://alert.victorops.com/x"}), json!({})),
        ("wecom", json!({"url": "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=k"}), json!({})),
        ("pagerduty", json!({}), json!({"integrationKey": "pd-1"})),
        ("opsgenie", json!({}), json!({"apiKey": "og-1"})),
        ("kafka", json!({"kafkaRestProxy": "http://proxy:8082", "kafkaTopic": "alerts"}), json!({})),
        (
            "jira",
            json!({"api_url": "https://jira.example.com/rest/api/2", "project": "OPS"}),
            json!({"api_token": "jira-1"}),
        ),
        ("mqtt", json!({"brokerUrl": "tcp://broker:1883", "topic": "alerts"}), json!({})),
    ];
    entries
        .into_iter()
        .map(|(kind, settings, secure)| {
            receiver(json!({
                "name": format!("{}-receiver", kind),
                "type": kind,
                "disable_resolve_message": disable_resolve_message,
                "settings": settings,
                "secure_settings": secure,
            }))
        })
        .collect()
}

fn deps_with_email(http: Arc<RecordingHttp>, email: Arc<RecordingEmail>) -> NotifierDeps {
    let mut deps = testing::deps(http);
    deps.email = Some(email);
    deps
}

#[test]
fn every_integration_type_builds() {
    let receivers = every_kind(false);
    assert_eq!(receivers.len(), ReceiverKind::ALL.len());

    let deps = deps_with_email(RecordingHttp::new(), RecordingEmail::new());
    let registry = NotifierRegistry::from_config(&receivers, &deps).unwrap();
    for kind in ReceiverKind::ALL {
        let notifier = registry
            .get(&format!("{}-receiver", kind))
            .unwrap_or_else(|| panic!("{} not registered", kind));
        assert_eq!(notifier.notifier_type(), kind.as_str());
        assert!(notifier.send_resolved());
    }
}

#[tokio::test]
async fn disabled_resolve_messages_make_no_calls() {
    let http = RecordingHttp::new();
    let email = RecordingEmail::new();
    let mqtt = FakeMqtt::new();
    let mut deps = deps_with_email(http.clone(), email.clone());
    deps.mqtt = mqtt.clone();

    let registry = NotifierRegistry::from_config(&every_kind(true), &deps).unwrap();
    let outcomes = registry
        .dispatch(&CancellationToken::new(), &testing::resolved_group())
        .await;

    assert_eq!(outcomes.len(), ReceiverKind::ALL.len());
    for outcome in &outcomes {
        assert!(outcome.is_success(), "{}: {:?}", outcome.receiver, outcome.result);
    }
    assert_eq!(http.count(), 0);
    assert!(email.messages().is_empty());
    assert!(mqtt.events().is_empty());
}

#[tokio::test]
async fn stateful_integrations_share_the_group_hash() {
    let http = RecordingHttp::new();
    let receivers: Vec<ReceiverConfig> = every_kind(false)
        .into_iter()
        .filter(|r| ["pagerduty", "opsgenie", "victorops", "kafka", "jira"].contains(&r.kind.as_str()))
        .collect();
    let registry = NotifierRegistry::from_config(&receivers, &testing::deps(http.clone())).unwrap();
    let group = testing::firing_group();
    let hash = group.key_hash();

    let outcomes = registry.dispatch(&CancellationToken::new(), &group).await;
    assert!(outcomes.iter().all(DispatchOutcome::is_success));

    let bodies: Vec<Value> = http.requests().iter().map(|r| r.body_json()).collect();
    let has = |pointer: &str, expected: &str| {
        bodies
            .iter()
            .any(|b| b.pointer(pointer).and_then(Value::as_str) == Some(expected))
    };
    assert!(has("/dedup_key", &hash));
    assert!(has("/alias", &hash));
    assert!(has("/entity_id", &hash));
    assert!(has("/records/0/value/incident_key", &hash));
    assert!(
        bodies
            .iter()
            .filter_map(|b| b.pointer("/fields/labels"))
            .any(|labels| labels.as_array().unwrap().contains(&json!(format!("ALERT{{{}}}", hash))))
    );
}

#[tokio::test]
async fn cancelled_token_stops_http_integrations() {
    let http = RecordingHttp::new();
    let receivers: Vec<ReceiverConfig> = every_kind(false)
        .into_iter()
        .filter(|r| r.kind != "email" && r.kind != "mqtt")
        .collect();
    let registry = NotifierRegistry::from_config(&receivers, &testing::deps(http.clone())).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcomes = registry.dispatch(&cancel, &testing::firing_group()).await;

    for outcome in outcomes {
        assert_eq!(outcome.result, Err(NotifyError::Cancelled), "{}", outcome.receiver);
    }
    assert_eq!(http.count(), 0);
}

#[tokio::test]
async fn missing_template_does_not_abort_notification() {
    let http = RecordingHttp::new();
    let receivers = vec![receiver(json!({
        "name": "chat",
        "type": "slack",
        "settings": {
            "url": "https://hooks.slack.com/services/T/B/X",
            "title": "{% include \"does.not.exist\" %}",
            "text": "{{ group_labels.alertname }} on {{ common_labels.cluster }}"
        }
    }))];
    let registry = NotifierRegistry::from_config(&receivers, &testing::deps(http.clone())).unwrap();
    let outcomes = registry
        .dispatch(&CancellationToken::new(), &testing::firing_group())
        .await;
    assert!(outcomes[0].is_success());

    let body = http.single().body_json();
    assert_eq!(body["attachments"][0]["title"], "");
    assert_eq!(body["attachments"][0]["text"], "HighCPU on eu-1");
}

#[tokio::test]
async fn mixed_group_is_firing_for_every_integration() {
    let http = RecordingHttp::new();
    let receivers: Vec<ReceiverConfig> = every_kind(true)
        .into_iter()
        .filter(|r| ["webhook", "pagerduty"].contains(&r.kind.as_str()))
        .collect();
    let registry = NotifierRegistry::from_config(&receivers, &testing::deps(http.clone())).unwrap();
    let group = testing::group(&[AlertStatus::Firing, AlertStatus::Resolved]);

    registry.dispatch(&CancellationToken::new(), &group).await;
    // disable_resolve_message only applies to fully resolved groups.
    assert_eq!(http.count(), 2);
}

#[test]
#[serial]
fn secure_settings_resolve_environment_variables() {
    temp_env::with_var("HERALD_TEST_PD_KEY", Some("from-env"), || {
        let receivers = vec![receiver(json!({
            "name": "pager",
            "type": "pagerduty",
            "secure_settings": {"integrationKey": "${HERALD_TEST_PD_KEY}"}
        }))];
        let registry = NotifierRegistry::from_config(&receivers, &testing::deps(RecordingHttp::new()));
        assert!(registry.is_ok(), "{:?}", registry.err());
    });
}

#[test]
#[serial]
fn undefined_secret_variable_names_the_receiver() {
    temp_env::with_var_unset("HERALD_TEST_UNDEFINED_KEY", || {
        let receivers = vec![receiver(json!({
            "name": "pager",
            "type": "pagerduty",
            "secure_settings": {"integrationKey": "${HERALD_TEST_UNDEFINED_KEY}"}
        }))];
        let errors = NotifierRegistry::from_config(&receivers, &testing::deps(RecordingHttp::new()))
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ConfigError::InvalidReceiver { name, kind, message } => {
                assert_eq!(name, "pager");
                assert_eq!(kind, "pagerduty");
                assert!(message.contains("HERALD_TEST_UNDEFINED_KEY"), "{}", message);
            }
            other => panic!("expected InvalidReceiver, got {:?}", other),
        }
    });
}
