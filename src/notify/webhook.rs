//! Generic webhook notifier.
//!
//! Posts the whole render context as a JSON envelope to an arbitrary HTTP
//! endpoint, with optional basic or `Authorization` header credentials.

use crate::alert::{AlertGroup, AlertStatus, LabelSet};
use crate::config::{
    FlexibleNumber, SecretResolver, SecretString, decode, require, validate_field_template,
    validate_http_url,
};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{Notifier, NotifierBase, NotifierDeps, send_checked, skip_resolved};
use crate::template::{DEFAULT_MESSAGE, DEFAULT_TITLE, RenderAlert};
use crate::transport::{HttpRequest, Method};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Envelope version, bumped on breaking payload changes.
const PAYLOAD_VERSION: &str = "1";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    url: String,
    #[serde(default)]
    http_method: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default, rename = "authorization_scheme")]
    authorization_scheme: String,
    #[serde(default, rename = "authorization_credentials")]
    authorization_credentials: String,
    #[serde(default)]
    max_alerts: FlexibleNumber,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// How the webhook request authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAuth {
    None,
    Basic {
        username: String,
        password: SecretString,
    },
    /// `Authorization: <scheme> <credentials>`.
    Header {
        scheme: String,
        credentials: SecretString,
    },
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: SecretString,
    pub method: Method,
    pub auth: WebhookAuth,
    /// Maximum alerts in the envelope, 0 for no limit.
    pub max_alerts: usize,
    pub title: Option<String>,
    pub message: Option<String>,
}

impl WebhookConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;

        let url = require("url", &secrets.get("url", &raw.url))?;
        validate_http_url("url", &url)?;

        let method = match raw.http_method.trim().to_uppercase().as_str() {
            "" | "POST" => Method::Post,
            "PUT" => Method::Put,
            other => {
                return Err(SettingsError::invalid(
                    "httpMethod",
                    format!("unsupported method '{}', expected POST or PUT", other),
                ));
            }
        };

        let password = secrets.get("password", &raw.password);
        let credentials = secrets.get("authorization_credentials", &raw.authorization_credentials);
        let has_basic = !raw.username.is_empty() || !password.is_empty();
        let auth = match (has_basic, credentials.is_empty()) {
            (true, false) => {
                return Err(SettingsError::Conflict(
                    "both HTTP basic authentication and Authorization header are set, only one is supported"
                        .to_string(),
                ));
            }
            (true, true) => WebhookAuth::Basic {
                username: raw.username,
                password: SecretString::new(password),
            },
            (false, false) => WebhookAuth::Header {
                scheme: match raw.authorization_scheme.trim() {
                    "" => "Bearer".to_string(),
                    scheme => scheme.to_string(),
                },
                credentials: SecretString::new(credentials),
            },
            (false, true) => WebhookAuth::None,
        };

        let max_alerts = match raw.max_alerts.as_i64() {
            Ok(None) => 0,
            Ok(Some(n)) if n >= 0 => n as usize,
            _ => {
                return Err(SettingsError::invalid(
                    "maxAlerts",
                    format!("must be a non-negative integer, got '{}'", raw.max_alerts),
                ));
            }
        };

        if let Some(title) = &raw.title {
            validate_field_template("title", title)?;
        }
        if let Some(message) = &raw.message {
            validate_field_template("message", message)?;
        }

        Ok(Self {
            url: SecretString::new(url),
            method,
            auth,
            max_alerts,
            title: raw.title,
            message: raw.message,
        })
    }
}

/// JSON body sent to the endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub receiver: String,
    pub status: AlertStatus,
    pub alerts: Vec<RenderAlert>,
    pub group_labels: LabelSet,
    pub common_labels: LabelSet,
    pub common_annotations: LabelSet,
    #[serde(rename = "externalURL")]
    pub external_url: String,
    pub version: &'static str,
    pub group_key: String,
    pub group_key_hash: String,
    pub truncated_alerts: usize,
    pub title: String,
    pub state: &'static str,
    pub message: String,
}

pub struct WebhookNotifier {
    base: NotifierBase,
    config: WebhookConfig,
    deps: NotifierDeps,
}

impl WebhookNotifier {
    pub fn new(base: NotifierBase, config: WebhookConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_webhook",
            notifier_name = %self.base.name,
            group_key = %group.key()
        );

        async {
            let ctx = self
                .deps
                .render_context_with_images(cancel, &self.base, group)
                .await;
            let mut tmpl = self.deps.templates.renderer(&ctx);
            let title = tmpl.render_or_default(self.config.title.as_deref(), DEFAULT_TITLE);
            let message = tmpl.render_or_default(self.config.message.as_deref(), DEFAULT_MESSAGE);
            let url = tmpl.render_or_raw(self.config.url.expose());
            tmpl.warn_on_error(&self.base.name, self.notifier_type());

            let mut alerts = ctx.alerts;
            let mut truncated_alerts = 0;
            if self.config.max_alerts > 0 && alerts.len() > self.config.max_alerts {
                truncated_alerts = alerts.len() - self.config.max_alerts;
                alerts.truncate(self.config.max_alerts);
            }

            let payload = WebhookPayload {
                receiver: ctx.receiver,
                status: ctx.status,
                alerts,
                group_labels: ctx.group_labels,
                common_labels: ctx.common_labels,
                common_annotations: ctx.common_annotations,
                external_url: ctx.external_url,
                version: PAYLOAD_VERSION,
                group_key: ctx.group_key,
                group_key_hash: ctx.group_key_hash,
                truncated_alerts,
                title,
                state: match ctx.status {
                    AlertStatus::Firing => "alerting",
                    AlertStatus::Resolved => "ok",
                },
                message,
            };

            let mut request = HttpRequest::new(self.config.method, url).json(&payload)?;
            request = match &self.config.auth {
                WebhookAuth::None => request,
                WebhookAuth::Basic { username, password } => {
                    request.basic_auth(username.clone(), password.clone())
                }
                WebhookAuth::Header {
                    scheme,
                    credentials,
                } => request.header(
                    "Authorization",
                    format!("{} {}", scheme, credentials.expose()),
                ),
            };
            tracing::trace!(body_len = request.body.len(), "Request body built");

            send_checked(self.deps.http.as_ref(), cancel, "webhook", request).await?;
            tracing::debug!(truncated_alerts, "Webhook notification sent");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("name", &self.base.name)
            .field("method", &self.config.method)
            .field("max_alerts", &self.config.max_alerts)
            .finish()
    }
}
