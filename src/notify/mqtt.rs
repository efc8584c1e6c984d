//! MQTT notifier.
//!
//! Each notification opens its own broker session: connect, publish once,
//! disconnect. The message is either the rendered text or a JSON document
//! carrying the whole render context.

use crate::alert::AlertGroup;
use crate::config::{
    FlexibleNumber, SecretResolver, SecretString, decode, require, validate_field_template,
};
use crate::error::{NotifyError, SettingsError, TransportError};
use crate::notify::{Notifier, NotifierBase, NotifierDeps, random_alphanumeric, skip_resolved};
use crate::template::{DEFAULT_MESSAGE, RenderContext};
use crate::transport::{MqttConnectOptions, MqttTlsConfig, QoS};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const CLIENT_ID_PREFIX: &str = "herald_";
const CLIENT_ID_RANDOM_LEN: usize = 8;

/// Version tag of the JSON message layout.
const MESSAGE_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    broker_url: String,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    message_format: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    qos: FlexibleNumber,
    #[serde(default)]
    retain: bool,
    #[serde(default)]
    insecure_skip_verify: bool,
    #[serde(default)]
    tls_config: Option<RawTls>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTls {
    #[serde(default)]
    ca_certificate: String,
    #[serde(default)]
    client_certificate: String,
    #[serde(default)]
    client_key: String,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_url: String,
    pub client_id: String,
    pub topic: String,
    pub message_format: MessageFormat,
    pub message: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub qos: QoS,
    pub retain: bool,
    pub tls: Option<MqttTlsConfig>,
}

fn validate_broker_url(value: &str) -> Result<(), SettingsError> {
    let url = Url::parse(value)
        .map_err(|e| SettingsError::invalid("brokerUrl", format!("not a valid URL: {}", e)))?;
    match url.scheme() {
        "tcp" | "ssl" | "tls" | "mqtt" | "mqtts" => {}
        other => {
            return Err(SettingsError::invalid(
                "brokerUrl",
                format!("unsupported scheme '{}', expected tcp or ssl", other),
            ));
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(SettingsError::invalid("brokerUrl", "missing host"));
    }
    Ok(())
}

impl MqttConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;

        let broker_url = require("brokerUrl", &raw.broker_url)?;
        validate_broker_url(&broker_url)?;
        let topic = require("topic", &raw.topic)?;

        let client_id = match raw.client_id.trim() {
            "" => format!("{}{}", CLIENT_ID_PREFIX, random_alphanumeric(CLIENT_ID_RANDOM_LEN)),
            id => id.to_string(),
        };

        let message_format = match raw.message_format.trim().to_lowercase().as_str() {
            "" | "json" => MessageFormat::Json,
            "text" => MessageFormat::Text,
            other => {
                return Err(SettingsError::invalid(
                    "messageFormat",
                    format!("'{}' is not one of json, text", other),
                ));
            }
        };

        let qos = match raw.qos.as_i64() {
            Ok(None) => QoS::default(),
            Ok(Some(n)) => QoS::try_from(n).map_err(|e| SettingsError::invalid("qos", e))?,
            Err(e) => return Err(SettingsError::invalid("qos", e.to_string())),
        };

        let username = Some(raw.username.trim().to_string()).filter(|u| !u.is_empty());
        let password = Some(secrets.get("password", &raw.password))
            .filter(|p| !p.is_empty())
            .map(SecretString::new);

        let tls = raw.tls_config.unwrap_or_default();
        let client_key = secrets.get("tlsClientKey", &tls.client_key);
        let non_blank = |v: String| Some(v).filter(|s| !s.trim().is_empty());
        let ca_cert = non_blank(secrets.get("tlsCACert", &tls.ca_certificate));
        let client_cert = non_blank(secrets.get("tlsClientCert", &tls.client_certificate));
        let client_key = non_blank(client_key).map(SecretString::new);
        if client_cert.is_some() != client_key.is_some() {
            return Err(SettingsError::invalid(
                "tlsConfig",
                "client certificate and client key must be set together",
            ));
        }
        let tls = if ca_cert.is_some() || client_cert.is_some() || raw.insecure_skip_verify {
            Some(MqttTlsConfig {
                ca_cert,
                client_cert,
                client_key,
                insecure_skip_verify: raw.insecure_skip_verify,
            })
        } else {
            None
        };

        if let Some(message) = &raw.message {
            validate_field_template("message", message)?;
        }

        Ok(Self {
            broker_url,
            client_id,
            topic,
            message_format,
            message: raw.message,
            username,
            password,
            qos,
            retain: raw.retain,
            tls,
        })
    }

    fn connect_options(&self) -> MqttConnectOptions {
        MqttConnectOptions {
            broker_url: self.broker_url.clone(),
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            tls: self.tls.clone(),
        }
    }
}

/// JSON message layout.
#[derive(Serialize)]
struct JsonMessage<'a> {
    #[serde(flatten)]
    context: &'a RenderContext,
    version: &'static str,
    message: String,
}

pub struct MqttNotifier {
    base: NotifierBase,
    config: MqttConfig,
    deps: NotifierDeps,
}

impl MqttNotifier {
    pub fn new(base: NotifierBase, config: MqttConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }

    fn payload(&self, group: &AlertGroup) -> Result<Bytes, NotifyError> {
        let ctx = self.deps.render_context(&self.base, group);
        let mut tmpl = self.deps.templates.renderer(&ctx);
        let message = tmpl.render_or_default(self.config.message.as_deref(), DEFAULT_MESSAGE);
        tmpl.warn_on_error(&self.base.name, self.notifier_type());

        match self.config.message_format {
            MessageFormat::Text => Ok(Bytes::from(message)),
            MessageFormat::Json => serde_json::to_vec(&JsonMessage {
                context: &ctx,
                version: MESSAGE_VERSION,
                message,
            })
            .map(Bytes::from)
            .map_err(|e| NotifyError::Permanent(format!("failed to encode message: {}", e))),
        }
    }
}

#[async_trait]
impl Notifier for MqttNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_mqtt",
            notifier_name = %self.base.name,
            group_key = %group.key(),
            topic = %self.config.topic
        );

        async {
            let payload = self.payload(group)?;

            let mut session = self
                .deps
                .mqtt
                .connect(cancel, &self.config.connect_options())
                .await
                .map_err(|e| match e {
                    TransportError::Cancelled => NotifyError::Cancelled,
                    other => NotifyError::Permanent(format!("mqtt connect failed: {}", other)),
                })?;

            let published = session
                .publish(cancel, &self.config.topic, self.config.qos, self.config.retain, payload)
                .await;
            if let Err(e) = session.disconnect().await {
                tracing::debug!(error = %e, "MQTT disconnect failed");
            }
            published?;

            tracing::debug!(qos = ?self.config.qos, "MQTT message published");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for MqttNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttNotifier")
            .field("name", &self.base.name)
            .field("config", &self.config)
            .finish()
    }
}
