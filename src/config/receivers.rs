//! Receiver entries of the configuration file.

use super::secret::{SecretString, SecureSettings};
use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One configured receiver: a named instance of an integration.
///
/// `settings` is kept as raw JSON; the integration named by `type` decodes
/// it when the registry builds the notifier.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub disable_resolve_message: bool,
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub secure_settings: HashMap<String, SecretString>,
}

impl ReceiverConfig {
    pub fn receiver_kind(&self) -> Result<ReceiverKind, ConfigError> {
        self.kind.parse().map_err(|e: UnknownReceiverKind| ConfigError::InvalidReceiver {
            name: self.name.clone(),
            kind: self.kind.clone(),
            message: e.to_string(),
        })
    }

    /// Secure settings with environment variables substituted.
    pub fn secrets(&self) -> Result<SecureSettings, ConfigError> {
        SecureSettings::resolve(&self.secure_settings).map_err(|e| ConfigError::InvalidReceiver {
            name: self.name.clone(),
            kind: self.kind.clone(),
            message: e.to_string(),
        })
    }
}

/// Supported integration types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiverKind {
    Webhook,
    Email,
    Slack,
    Discord,
    Teams,
    Dooray,
    Telegram,
    Line,
    Threema,
    Webex,
    VictorOps,
    WeCom,
    PagerDuty,
    Opsgenie,
    Kafka,
    Jira,
    Mqtt,
}

impl ReceiverKind {
    pub const ALL: [ReceiverKind; 17] = [
        ReceiverKind::Webhook,
        ReceiverKind::Email,
        ReceiverKind::Slack,
        ReceiverKind::Discord,
        ReceiverKind::Teams,
        ReceiverKind::Dooray,
        ReceiverKind::Telegram,
        ReceiverKind::Line,
        ReceiverKind::Threema,
        ReceiverKind::Webex,
        ReceiverKind::VictorOps,
        ReceiverKind::WeCom,
        ReceiverKind::PagerDuty,
        ReceiverKind::Opsgenie,
        ReceiverKind::Kafka,
        ReceiverKind::Jira,
        ReceiverKind::Mqtt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiverKind::Webhook => "webhook",
            ReceiverKind::Email => "email",
            ReceiverKind::Slack => "slack",
            ReceiverKind::Discord => "discord",
            ReceiverKind::Teams => "teams",
            ReceiverKind::Dooray => "dooray",
            ReceiverKind::Telegram => "telegram",
            ReceiverKind::Line => "line",
            ReceiverKind::Threema => "threema",
            ReceiverKind::Webex => "webex",
            ReceiverKind::VictorOps => "victorops",
            ReceiverKind::WeCom => "wecom",
            ReceiverKind::PagerDuty => "pagerduty",
            ReceiverKind::Opsgenie => "opsgenie",
            ReceiverKind::Kafka => "kafka",
            ReceiverKind::Jira => "jira",
            ReceiverKind::Mqtt => "mqtt",
        }
    }
}

impl fmt::Display for ReceiverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown receiver type '{0}'")]
pub struct UnknownReceiverKind(String);

impl FromStr for ReceiverKind {
    type Err = UnknownReceiverKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ReceiverKind::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| UnknownReceiverKind(s.to_string()))
    }
}
