//! Cisco Webex notifier.

use crate::alert::AlertGroup;
use crate::config::{
    SecretResolver, SecretString, decode, require, validate_field_template, validate_http_url,
};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{Notifier, NotifierBase, NotifierDeps, send_checked, skip_resolved};
use crate::template::DEFAULT_MESSAGE;
use crate::transport::HttpRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub const WEBEX_API_URL: &str = "https://webexapis.com/v1/messages";

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    api_url: String,
    #[serde(default)]
    room_id: String,
    #[serde(default)]
    bot_token: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebexConfig {
    pub api_url: String,
    pub room_id: String,
    pub bot_token: SecretString,
    pub message: Option<String>,
}

impl WebexConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;
        let api_url = match raw.api_url.trim() {
            "" => WEBEX_API_URL.to_string(),
            url => url.to_string(),
        };
        validate_http_url("api_url", &api_url)?;
        let room_id = require("room_id", &raw.room_id)?;
        let bot_token = require("bot_token", &secrets.get("bot_token", &raw.bot_token))?;
        if let Some(message) = &raw.message {
            validate_field_template("message", message)?;
        }
        Ok(Self {
            api_url,
            room_id,
            bot_token: SecretString::new(bot_token),
            message: raw.message,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebexMessage<'a> {
    room_id: &'a str,
    markdown: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    files: Vec<String>,
}

pub struct WebexNotifier {
    base: NotifierBase,
    config: WebexConfig,
    deps: NotifierDeps,
}

impl WebexNotifier {
    pub fn new(base: NotifierBase, config: WebexConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }
}

#[async_trait]
impl Notifier for WebexNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_webex",
            notifier_name = %self.base.name,
            group_key = %group.key()
        );

        async {
            let ctx = self
                .deps
                .render_context_with_images(cancel, &self.base, group)
                .await;
            let mut tmpl = self.deps.templates.renderer(&ctx);
            let markdown = tmpl.render_or_default(self.config.message.as_deref(), DEFAULT_MESSAGE);
            tmpl.warn_on_error(&self.base.name, self.notifier_type());

            // Webex accepts a single file per message.
            let files = ctx
                .alerts
                .iter()
                .find_map(|a| a.image_url.clone())
                .into_iter()
                .collect();

            let message = WebexMessage {
                room_id: &self.config.room_id,
                markdown,
                files,
            };
            let request = HttpRequest::post(self.config.api_url.as_str())
                .bearer_auth(self.config.bot_token.clone())
                .json(&message)?;
            send_checked(self.deps.http.as_ref(), cancel, "webex", request).await?;
            tracing::debug!("Webex notification sent");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
