//! Notifier registry: builds the configured receivers and fans alert groups
//! out to them.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::alert::AlertGroup;
use crate::config::{ReceiverConfig, ReceiverKind, SecureSettings};
use crate::error::{ConfigError, NotifyError, SettingsError};

use super::discord::{DiscordConfig, DiscordNotifier};
use super::dooray::{DoorayConfig, DoorayNotifier};
use super::email::{EmailConfig, EmailNotifier};
use super::jira::{JiraConfig, JiraNotifier};
use super::kafka::{KafkaConfig, KafkaNotifier};
use super::line::{LineConfig, LineNotifier};
use super::mqtt::{MqttConfig, MqttNotifier};
use super::opsgenie::{OpsgenieConfig, OpsgenieNotifier};
use super::pagerduty::{PagerDutyConfig, PagerDutyNotifier};
use super::slack::{SlackConfig, SlackNotifier};
use super::teams::{TeamsConfig, TeamsNotifier};
use super::telegram::{TelegramConfig, TelegramNotifier};
use super::threema::{ThreemaConfig, ThreemaNotifier};
use super::victorops::{VictorOpsConfig, VictorOpsNotifier};
use super::webex::{WebexConfig, WebexNotifier};
use super::webhook::{WebhookConfig, WebhookNotifier};
use super::wecom::{WeComConfig, WeComNotifier};
use super::{Notifier, NotifierBase, NotifierDeps};

/// Result of delivering one group to one receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub receiver: String,
    pub notifier_type: String,
    pub result: Result<(), NotifyError>,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// The configured receivers, in configuration order.
///
/// Names are unique.
#[derive(Debug, Default)]
pub struct NotifierRegistry {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            notifiers: Vec::new(),
        }
    }

    /// Register a notifier.
    ///
    /// # Returns
    ///
    /// Error if a notifier with the same name already exists.
    pub fn register(&mut self, notifier: Arc<dyn Notifier>) -> Result<(), ConfigError> {
        if self.get(notifier.name()).is_some() {
            return Err(ConfigError::ValidationError(format!(
                "receiver '{}' already registered",
                notifier.name()
            )));
        }
        self.notifiers.push(notifier);
        Ok(())
    }

    /// Get a notifier by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Notifier>> {
        self.notifiers.iter().find(|n| n.name() == name).cloned()
    }

    /// Registered receiver names, in configuration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.notifiers.iter().map(|n| n.name())
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// Create a registry from the `receivers` section.
    ///
    /// Every receiver is built, so one invalid entry does not hide the
    /// others.
    ///
    /// # Returns
    ///
    /// * `Ok(NotifierRegistry)` - Registry with all configured receivers
    /// * `Err(Vec<ConfigError>)` - All errors encountered, each naming its
    ///   receiver
    pub fn from_config(
        receivers: &[ReceiverConfig],
        deps: &NotifierDeps,
    ) -> Result<Self, Vec<ConfigError>> {
        let mut registry = NotifierRegistry::new();
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for receiver in receivers {
            if !seen.insert(receiver.name.as_str()) {
                errors.push(ConfigError::ValidationError(format!(
                    "duplicate receiver name '{}'",
                    receiver.name
                )));
                continue;
            }
            match build_notifier(receiver, deps) {
                Ok(notifier) => {
                    tracing::info!(
                        notifier_name = %notifier.name(),
                        notifier_type = %notifier.notifier_type(),
                        send_resolved = notifier.send_resolved(),
                        "Registered receiver from config"
                    );
                    if let Err(e) = registry.register(notifier) {
                        errors.push(e);
                    }
                }
                Err(e) => {
                    metrics::counter!(
                        "herald_receiver_config_errors_total",
                        "receiver" => receiver.name.clone(),
                        "notifier_type" => receiver.kind.clone()
                    )
                    .increment(1);
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            Ok(registry)
        } else {
            Err(errors)
        }
    }

    /// Narrow the registry to the named receivers, keeping registry order.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] naming the first unknown receiver.
    pub fn select(&self, names: &[String]) -> Result<Self, ConfigError> {
        if let Some(unknown) = names.iter().find(|n| self.get(n).is_none()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown receiver '{}'",
                unknown
            )));
        }
        let notifiers = self
            .notifiers
            .iter()
            .filter(|n| names.iter().any(|name| name == n.name()))
            .cloned()
            .collect();
        Ok(Self { notifiers })
    }

    /// Deliver `group` to every receiver concurrently.
    ///
    /// Returns one outcome per receiver, in registry order. Nothing is
    /// retried here; callers decide based on [`NotifyError::is_retryable`].
    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        group: &AlertGroup,
    ) -> Vec<DispatchOutcome> {
        let deliveries = self.notifiers.iter().map(|notifier| async move {
            let result = notifier.notify(cancel, group).await;
            record_outcome(notifier.as_ref(), group, &result);
            DispatchOutcome {
                receiver: notifier.name().to_string(),
                notifier_type: notifier.notifier_type().to_string(),
                result,
            }
        });
        join_all(deliveries).await
    }
}

fn record_outcome(notifier: &dyn Notifier, group: &AlertGroup, result: &Result<(), NotifyError>) {
    match result {
        Ok(()) => {
            metrics::counter!(
                "herald_notifications_sent_total",
                "receiver" => notifier.name().to_string(),
                "notifier_type" => notifier.notifier_type().to_string()
            )
            .increment(1);
            tracing::info!(
                notifier_name = %notifier.name(),
                notifier_type = %notifier.notifier_type(),
                group_key = %group.key(),
                alert_count = group.len(),
                "Notification delivered"
            );
        }
        Err(NotifyError::Cancelled) => {
            tracing::debug!(
                notifier_name = %notifier.name(),
                group_key = %group.key(),
                "Notification cancelled"
            );
        }
        Err(e) => {
            let error_type = if e.is_retryable() { "retryable" } else { "permanent" };
            metrics::counter!(
                "herald_notify_errors_total",
                "receiver" => notifier.name().to_string(),
                "notifier_type" => notifier.notifier_type().to_string(),
                "error_type" => error_type
            )
            .increment(1);
            tracing::error!(
                notifier_name = %notifier.name(),
                notifier_type = %notifier.notifier_type(),
                group_key = %group.key(),
                retryable = e.is_retryable(),
                error = %e,
                "Notification failed"
            );
        }
    }
}

/// Build one notifier from its receiver entry.
fn build_notifier(
    receiver: &ReceiverConfig,
    deps: &NotifierDeps,
) -> Result<Arc<dyn Notifier>, ConfigError> {
    let kind = receiver.receiver_kind()?;
    let secrets: SecureSettings = receiver.secrets()?;
    let settings = &receiver.settings;
    let base = NotifierBase::from_receiver(receiver, kind);
    let invalid = |e: SettingsError| ConfigError::InvalidReceiver {
        name: receiver.name.clone(),
        kind: receiver.kind.clone(),
        message: e.to_string(),
    };
    let deps = deps.clone();

    let notifier: Arc<dyn Notifier> = match kind {
        ReceiverKind::Webhook => Arc::new(WebhookNotifier::new(
            base,
            WebhookConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::Email => {
            if deps.email.is_none() {
                return Err(ConfigError::InvalidReceiver {
                    name: receiver.name.clone(),
                    kind: receiver.kind.clone(),
                    message: "email receivers need the smtp section to be configured".to_string(),
                });
            }
            Arc::new(EmailNotifier::new(
                base,
                EmailConfig::from_settings(settings, &secrets).map_err(invalid)?,
                deps,
            ))
        }
        ReceiverKind::Slack => Arc::new(SlackNotifier::new(
            base,
            SlackConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::Discord => Arc::new(DiscordNotifier::new(
            base,
            DiscordConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::Teams => Arc::new(TeamsNotifier::new(
            base,
            TeamsConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::Dooray => Arc::new(DoorayNotifier::new(
            base,
            DoorayConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::Telegram => Arc::new(TelegramNotifier::new(
            base,
            TelegramConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::Line => Arc::new(LineNotifier::new(
            base,
            LineConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::Threema => Arc::new(ThreemaNotifier::new(
            base,
            ThreemaConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::Webex => Arc::new(WebexNotifier::new(
            base,
            WebexConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::VictorOps => Arc::new(VictorOpsNotifier::new(
            base,
            VictorOpsConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::WeCom => Arc::new(WeComNotifier::new(
            base,
            WeComConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::PagerDuty => Arc::new(PagerDutyNotifier::new(
            base,
            PagerDutyConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::Opsgenie => Arc::new(OpsgenieNotifier::new(
            base,
            OpsgenieConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::Kafka => Arc::new(KafkaNotifier::new(
            base,
            KafkaConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::Jira => Arc::new(JiraNotifier::new(
            base,
            JiraConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
        ReceiverKind::Mqtt => Arc::new(MqttNotifier::new(
            base,
            MqttConfig::from_settings(settings, &secrets).map_err(invalid)?,
            deps,
        )),
    };
    Ok(notifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertStatus;
    use crate::notify::testing::{self, RecordingEmail, RecordingHttp, status};
    use async_trait::async_trait;
    use serde_json::json;

    fn receiver(value: serde_json::Value) -> ReceiverConfig {
        serde_json::from_value(value).unwrap()
    }

    struct Scripted {
        base: NotifierBase,
        result: Result<(), NotifyError>,
    }

    #[async_trait]
    impl Notifier for Scripted {
        fn base(&self) -> &NotifierBase {
            &self.base
        }

        async fn notify(&self, _cancel: &CancellationToken, _group: &AlertGroup) -> Result<(), NotifyError> {
            self.result.clone()
        }
    }

    fn scripted(name: &str, result: Result<(), NotifyError>) -> Arc<dyn Notifier> {
        Arc::new(Scripted {
            base: NotifierBase::new(name, ReceiverKind::Webhook),
            result,
        })
    }

    #[test]
    fn registry_new_is_empty() {
        let registry = NotifierRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn select_keeps_registry_order_and_rejects_unknown_names() {
        let mut registry = NotifierRegistry::new();
        for name in ["a", "b", "c"] {
            registry.register(scripted(name, Ok(()))).unwrap();
        }

        let picked = registry.select(&["c".to_string(), "a".to_string()]).unwrap();
        assert_eq!(picked.names().collect::<Vec<_>>(), vec!["a", "c"]);

        let err = registry.select(&["zzz".to_string()]).unwrap_err();
        assert!(err.to_string().contains("zzz"));
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut registry = NotifierRegistry::new();
        registry.register(scripted("ops", Ok(()))).unwrap();
        let err = registry.register(scripted("ops", Ok(()))).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("ops").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn from_config_builds_every_receiver_in_order() {
        let receivers = vec![
            receiver(json!({"name": "hook", "type": "webhook", "settings": {"url": "https://hooks.example.com/a"}})),
            receiver(json!({
                "name": "pager",
                "type": "PagerDuty",
                "disable_resolve_message": true,
                "secure_settings": {"integrationKey": "k"}
            })),
            receiver(json!({"name": "teams", "type": "teams", "settings": {"url": "https://outlook.office.com/webhook/x"}})),
        ];
        let registry = NotifierRegistry::from_config(&receivers, &testing::deps(RecordingHttp::new())).unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["hook", "pager", "teams"]);

        let pager = registry.get("pager").unwrap();
        assert_eq!(pager.notifier_type(), "pagerduty");
        assert!(!pager.send_resolved());
    }

    #[test]
    fn from_config_collects_all_errors() {
        let receivers = vec![
            receiver(json!({"name": "a", "type": "carrier-pigeon"})),
            receiver(json!({"name": "b", "type": "slack", "settings": {}})),
            receiver(json!({"name": "c", "type": "webhook", "settings": {"url": "https://x.example.com"}})),
            receiver(json!({"name": "c", "type": "webhook", "settings": {"url": "https://y.example.com"}})),
        ];
        let errors = NotifierRegistry::from_config(&receivers, &testing::deps(RecordingHttp::new()))
            .unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].to_string().contains("carrier-pigeon"));
        match &errors[1] {
            ConfigError::InvalidReceiver { name, kind, .. } => {
                assert_eq!(name, "b");
                assert_eq!(kind, "slack");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(errors[2].to_string().contains("duplicate receiver name 'c'"));
    }

    #[test]
    fn email_receiver_needs_smtp() {
        let receivers = vec![receiver(json!({
            "name": "mail",
            "type": "email",
            "settings": {"addresses": "ops@example.com"}
        }))];
        let mut deps = testing::deps(RecordingHttp::new());
        deps.email = None;
        let errors = NotifierRegistry::from_config(&receivers, &deps).unwrap_err();
        assert!(errors[0].to_string().contains("smtp"));

        deps.email = Some(RecordingEmail::new());
        assert!(NotifierRegistry::from_config(&receivers, &deps).is_ok());
    }

    #[tokio::test]
    async fn dispatch_returns_one_outcome_per_receiver() {
        let mut registry = NotifierRegistry::new();
        registry.register(scripted("ok", Ok(()))).unwrap();
        registry
            .register(scripted("flaky", Err(NotifyError::Retryable("503".into()))))
            .unwrap();
        registry
            .register(scripted("broken", Err(NotifyError::Permanent("400".into()))))
            .unwrap();

        let outcomes = registry
            .dispatch(&CancellationToken::new(), &testing::firing_group())
            .await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].receiver, "ok");
        assert!(outcomes[0].is_success());
        assert!(outcomes[1].result.as_ref().unwrap_err().is_retryable());
        assert!(!outcomes[2].result.as_ref().unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn dispatch_reaches_real_notifiers() {
        let http = RecordingHttp::with_responses(vec![status(200, "ok")]);
        let receivers = vec![
            receiver(json!({"name": "hook", "type": "webhook", "settings": {"url": "https://hooks.example.com/a"}})),
            receiver(json!({
                "name": "quiet",
                "type": "webhook",
                "disable_resolve_message": true,
                "settings": {"url": "https://hooks.example.com/b"}
            })),
        ];
        let registry = NotifierRegistry::from_config(&receivers, &testing::deps(http.clone())).unwrap();
        let group = testing::group(&[AlertStatus::Resolved]);

        let outcomes = registry.dispatch(&CancellationToken::new(), &group).await;
        assert!(outcomes.iter().all(DispatchOutcome::is_success));
        // The receiver with resolved messages disabled sends nothing.
        assert_eq!(http.single().url, "https://hooks.example.com/a");
    }
}
