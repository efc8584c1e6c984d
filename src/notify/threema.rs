//! Threema Gateway notifier (basic mode, `send_simple`).

use crate::alert::{AlertGroup, AlertStatus};
use crate::config::{SecretResolver, SecretString, decode, require, validate_field_template};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{Notifier, NotifierBase, NotifierDeps, send_checked, skip_resolved};
use crate::template::{DEFAULT_MESSAGE, DEFAULT_TITLE};
use crate::transport::HttpRequest;
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub const THREEMA_API_URL: &str = "https://msgapi.threema.ch/send_simple";

/// Length of gateway and recipient identities.
const ID_LEN: usize = 8;

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    gateway_id: String,
    #[serde(default)]
    recipient_id: String,
    #[serde(default)]
    api_secret: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ThreemaConfig {
    pub gateway_id: String,
    pub recipient_id: String,
    pub api_secret: SecretString,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: String,
}

impl ThreemaConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;

        let gateway_id = require("gateway_id", &raw.gateway_id)?;
        if !gateway_id.starts_with('*') {
            return Err(SettingsError::invalid("gateway_id", "must start with a *"));
        }
        if gateway_id.chars().count() != ID_LEN {
            return Err(SettingsError::invalid(
                "gateway_id",
                format!("must be {} characters long", ID_LEN),
            ));
        }

        let recipient_id = require("recipient_id", &raw.recipient_id)?;
        if recipient_id.chars().count() != ID_LEN {
            return Err(SettingsError::invalid(
                "recipient_id",
                format!("must be {} characters long", ID_LEN),
            ));
        }

        let api_secret = require("api_secret", &secrets.get("api_secret", &raw.api_secret))?;

        if let Some(title) = &raw.title {
            validate_field_template("title", title)?;
        }
        if let Some(description) = &raw.description {
            validate_field_template("description", description)?;
        }

        Ok(Self {
            gateway_id,
            recipient_id,
            api_secret: SecretString::new(api_secret),
            title: raw.title,
            description: raw.description,
            url: THREEMA_API_URL.to_string(),
        })
    }
}

pub struct ThreemaNotifier {
    base: NotifierBase,
    config: ThreemaConfig,
    deps: NotifierDeps,
}

impl ThreemaNotifier {
    pub fn new(base: NotifierBase, config: ThreemaConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }
}

#[async_trait]
impl Notifier for ThreemaNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_threema",
            notifier_name = %self.base.name,
            group_key = %group.key()
        );

        async {
            let ctx = self.deps.render_context(&self.base, group);
            let mut tmpl = self.deps.templates.renderer(&ctx);
            let title = tmpl.render_or_default(self.config.title.as_deref(), DEFAULT_TITLE);
            let description =
                tmpl.render_or_default(self.config.description.as_deref(), DEFAULT_MESSAGE);
            tmpl.warn_on_error(&self.base.name, self.notifier_type());

            let emoji = match ctx.status {
                AlertStatus::Firing => "\u{26A0}\u{FE0F}",
                AlertStatus::Resolved => "\u{2705}",
            };
            let mut text = format!("{} {}\n\n*Message:*\n{}", emoji, title, description);
            if !ctx.external_url.is_empty() {
                text.push_str(&format!("\n*URL:* {}", ctx.external_url));
            }

            let request = HttpRequest::post(self.config.url.as_str()).form(&[
                ("from", self.config.gateway_id.as_str()),
                ("to", self.config.recipient_id.as_str()),
                ("secret", self.config.api_secret.expose()),
                ("text", text.as_str()),
            ]);
            send_checked(self.deps.http.as_ref(), cancel, "threema", request).await?;
            tracing::debug!("Threema notification sent");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
