//! VictorOps (Splunk On-Call) REST endpoint notifier.
//!
//! The incident is keyed on the group key hash (`entity_id`), so a later
//! `RECOVERY` message closes the incident opened by the firing one.

use crate::alert::AlertGroup;
use crate::config::{
    SecretResolver, SecretString, decode, require, validate_field_template, validate_http_url,
};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{Notifier, NotifierBase, NotifierDeps, send_checked, skip_resolved};
use crate::template::{DEFAULT_MESSAGE, DEFAULT_TITLE};
use crate::transport::HttpRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const DEFAULT_MESSAGE_TYPE: &str = "CRITICAL";
const RECOVERY: &str = "RECOVERY";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    url: String,
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VictorOpsConfig {
    pub url: SecretString,
    /// Message type template for firing groups; resolved groups always send
    /// `RECOVERY`.
    pub message_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl VictorOpsConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;
        let url = require("url", &secrets.get("url", &raw.url))?;
        validate_http_url("url", &url)?;
        for (field, source) in [
            ("messageType", &raw.message_type),
            ("title", &raw.title),
            ("description", &raw.description),
        ] {
            if let Some(source) = source {
                validate_field_template(field, source)?;
            }
        }
        Ok(Self {
            url: SecretString::new(url),
            message_type: raw.message_type,
            title: raw.title,
            description: raw.description,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct VictorOpsEvent {
    pub message_type: String,
    pub entity_id: String,
    pub entity_display_name: String,
    pub timestamp: i64,
    pub state_start_time: i64,
    pub state_message: String,
    pub monitoring_tool: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub alert_url: String,
}

pub struct VictorOpsNotifier {
    base: NotifierBase,
    config: VictorOpsConfig,
    deps: NotifierDeps,
}

impl VictorOpsNotifier {
    pub fn new(base: NotifierBase, config: VictorOpsConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }
}

#[async_trait]
impl Notifier for VictorOpsNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_victorops",
            notifier_name = %self.base.name,
            group_key = %group.key()
        );

        async {
            let ctx = self.deps.render_context(&self.base, group);
            let mut tmpl = self.deps.templates.renderer(&ctx);
            let message_type = if group.is_resolved() {
                RECOVERY.to_string()
            } else {
                let rendered = tmpl.render_or_default(self.config.message_type.as_deref(), DEFAULT_MESSAGE_TYPE);
                match rendered.trim() {
                    "" => DEFAULT_MESSAGE_TYPE.to_string(),
                    value => value.to_uppercase(),
                }
            };
            let title = tmpl.render_or_default(self.config.title.as_deref(), DEFAULT_TITLE);
            let description =
                tmpl.render_or_default(self.config.description.as_deref(), DEFAULT_MESSAGE);
            let url = tmpl.render_or_raw(self.config.url.expose());
            tmpl.warn_on_error(&self.base.name, self.notifier_type());

            let now = self.deps.clock.now().timestamp();
            let event = VictorOpsEvent {
                message_type,
                entity_id: ctx.group_key_hash.clone(),
                entity_display_name: title,
                timestamp: now,
                state_start_time: now,
                state_message: description,
                monitoring_tool: "herald",
                alert_url: ctx.external_url.clone(),
            };

            let request = HttpRequest::post(url).json(&event)?;
            send_checked(self.deps.http.as_ref(), cancel, "victorops", request).await?;
            tracing::debug!(message_type = %event.message_type, "VictorOps notification sent");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
