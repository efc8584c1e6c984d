//! Discord webhook notifier.

use crate::alert::{AlertGroup, AlertStatus};
use crate::config::{SecretResolver, SecretString, decode, require, validate_field_template, validate_http_url};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{
    Notifier, NotifierBase, NotifierDeps, send_checked, skip_resolved, truncate_field,
};
use crate::template::{DEFAULT_MESSAGE, DEFAULT_TITLE};
use crate::transport::HttpRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Discord limit for the message `content`.
const MAX_CONTENT_CHARS: usize = 2000;
/// Discord limit for an embed title.
const MAX_EMBED_TITLE_CHARS: usize = 256;

const COLOR_FIRING: u32 = 0xD63232;
const COLOR_RESOLVED: u32 = 0x36A64F;

const DEFAULT_USERNAME: &str = "Herald";

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    url: String,
    #[serde(default)]
    avatar_url: String,
    #[serde(default)]
    use_discord_username: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub url: SecretString,
    pub avatar_url: String,
    /// Keep the username configured on the Discord webhook.
    pub use_discord_username: bool,
    pub title: Option<String>,
    pub message: Option<String>,
}

impl DiscordConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;
        let url = require("url", &secrets.get("url", &raw.url))?;
        validate_http_url("url", &url)?;
        if !raw.avatar_url.is_empty() {
            validate_http_url("avatar_url", &raw.avatar_url)?;
        }
        if let Some(title) = &raw.title {
            validate_field_template("title", title)?;
        }
        if let Some(message) = &raw.message {
            validate_field_template("message", message)?;
        }
        Ok(Self {
            url: SecretString::new(url),
            avatar_url: raw.avatar_url,
            use_discord_username: raw.use_discord_username,
            title: raw.title,
            message: raw.message,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct DiscordMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub avatar_url: String,
    pub embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
pub struct DiscordEmbed {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    pub color: u32,
    pub footer: DiscordFooter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<DiscordImage>,
}

#[derive(Debug, Serialize)]
pub struct DiscordFooter {
    pub text: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscordImage {
    pub url: String,
}

pub struct DiscordNotifier {
    base: NotifierBase,
    config: DiscordConfig,
    deps: NotifierDeps,
}

impl DiscordNotifier {
    pub fn new(base: NotifierBase, config: DiscordConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_discord",
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
            let content = tmpl.render_or_default(self.config.message.as_deref(), DEFAULT_MESSAGE);
            let url = tmpl.render_or_raw(self.config.url.expose());
            tmpl.warn_on_error(&self.base.name, self.notifier_type());

            let message = DiscordMessage {
                username: (!self.config.use_discord_username).then(|| DEFAULT_USERNAME.to_string()),
                content: truncate_field(&self.base, "content", &content, MAX_CONTENT_CHARS),
                avatar_url: self.config.avatar_url.clone(),
                embeds: vec![DiscordEmbed {
                    title: truncate_field(&self.base, "title", &title, MAX_EMBED_TITLE_CHARS),
                    kind: "rich",
                    url: ctx
                        .alerts
                        .iter()
                        .find_map(|a| a.generator_url.clone())
                        .unwrap_or_else(|| ctx.external_url.clone()),
                    color: match ctx.status {
                        AlertStatus::Firing => COLOR_FIRING,
                        AlertStatus::Resolved => COLOR_RESOLVED,
                    },
                    footer: DiscordFooter { text: "herald" },
                    image: ctx
                        .alerts
                        .iter()
                        .find_map(|a| a.image_url.clone())
                        .map(|url| DiscordImage { url }),
                }],
            };

            let request = HttpRequest::post(url).json(&message)?;
            send_checked(self.deps.http.as_ref(), cancel, "discord", request).await?;
            tracing::debug!("Discord notification sent");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
