//! Dooray incoming-webhook notifier.

use crate::alert::AlertGroup;
use crate::config::{SecretResolver, SecretString, decode, require, validate_field_template, validate_http_url};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{Notifier, NotifierBase, NotifierDeps, send_checked, skip_resolved};
use crate::template::{DEFAULT_MESSAGE, DEFAULT_TITLE};
use crate::transport::HttpRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const BOT_NAME: &str = "Herald";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    url: String,
    #[serde(default, rename = "iconURL")]
    icon_url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DoorayConfig {
    /// Carries the hook token, so it is kept secret.
    pub url: SecretString,
    pub icon_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl DoorayConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;
        let url = require("url", &secrets.get("url", &raw.url))?;
        validate_http_url("url", &url)?;
        let icon_url = match raw.icon_url.trim() {
            "" => None,
            icon => {
                validate_http_url("iconURL", icon)?;
                Some(icon.to_string())
            }
        };
        if let Some(title) = &raw.title {
            validate_field_template("title", title)?;
        }
        if let Some(description) = &raw.description {
            validate_field_template("description", description)?;
        }
        Ok(Self {
            url: SecretString::new(url),
            icon_url,
            title: raw.title,
            description: raw.description,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoorayMessage {
    pub bot_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_icon_image: Option<String>,
    pub text: String,
    pub attachments: Vec<DoorayAttachment>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoorayAttachment {
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title_link: String,
    pub text: String,
}

pub struct DoorayNotifier {
    base: NotifierBase,
    config: DoorayConfig,
    deps: NotifierDeps,
}

impl DoorayNotifier {
    pub fn new(base: NotifierBase, config: DoorayConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }
}

#[async_trait]
impl Notifier for DoorayNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_dooray",
            notifier_name = %self.base.name,
            group_key = %group.key()
        );

        async {
            let ctx = self.deps.render_context(&self.base, group);
            let mut tmpl = self.deps.templates.renderer(&ctx);
            let title = tmpl.render_or_default(self.config.title.as_deref(), DEFAULT_TITLE);
            let description =
                tmpl.render_or_default(self.config.description.as_deref(), DEFAULT_MESSAGE);
            let url = tmpl.render_or_raw(self.config.url.expose());
            tmpl.warn_on_error(&self.base.name, self.notifier_type());

            let message = DoorayMessage {
                bot_name: BOT_NAME,
                bot_icon_image: self.config.icon_url.clone(),
                text: title.clone(),
                attachments: vec![DoorayAttachment {
                    title,
                    title_link: ctx.external_url.clone(),
                    text: description,
                }],
            };

            let request = HttpRequest::post(url).json(&message)?;
            send_checked(self.deps.http.as_ref(), cancel, "dooray", request).await?;
            tracing::debug!("Dooray notification sent");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for DoorayNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoorayNotifier")
            .field("name", &self.base.name)
            .field("url", &self.config.url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReceiverKind, SecureSettings};
    use crate::notify::testing::{self, RecordingHttp, status};
    use serde_json::json;

    const HOOK: &str = "https://hook.dooray.com/services/1/2/token";

    fn notifier(settings: serde_json::Value, http: std::sync::Arc<RecordingHttp>) -> DoorayNotifier {
        let config = DoorayConfig::from_settings(&settings, &SecureSettings::default()).unwrap();
        DoorayNotifier::new(testing::base(ReceiverKind::Dooray), config, testing::deps(http))
    }

    #[test]
    fn settings_require_url() {
        let err = DoorayConfig::from_settings(&json!({}), &SecureSettings::default()).unwrap_err();
        assert!(matches!(err, SettingsError::Missing("url")));
    }

    #[test]
    fn url_may_come_from_secure_settings() {
        let secrets = SecureSettings::from_pairs([("url", HOOK)]);
        let config = DoorayConfig::from_settings(&json!({}), &secrets).unwrap();
        assert_eq!(config.url.expose(), HOOK);
    }

    #[test]
    fn icon_url_must_be_http() {
        let err = DoorayConfig::from_settings(
            &json!({"url": HOOK, "iconURL": "ftp://icons/x.png"}),
            &SecureSettings::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("iconURL"));
    }

    #[tokio::test]
    async fn posts_title_and_description_attachment() {
        let http = RecordingHttp::new();
        notifier(
            json!({
                "url": HOOK,
                "iconURL": "https://example.com/icon.png",
                "title": "[{{ status }}] {{ group_labels.alertname }}",
                "description": "{{ alerts | length }} alert(s)"
            }),
            http.clone(),
        )
        .notify(&CancellationToken::new(), &testing::firing_group())
        .await
        .unwrap();

        let req = http.single();
        assert_eq!(req.url, HOOK);
        let body = req.body_json();
        assert_eq!(body["botName"], "Herald");
        assert_eq!(body["botIconImage"], "https://example.com/icon.png");
        assert_eq!(body["text"], "[firing] HighCPU");
        assert_eq!(body["attachments"][0]["title"], "[firing] HighCPU");
        assert_eq!(body["attachments"][0]["titleLink"], "https://grafana.example.com");
        assert_eq!(body["attachments"][0]["text"], "1 alert(s)");
    }

    #[tokio::test]
    async fn omits_icon_when_unset() {
        let http = RecordingHttp::new();
        notifier(json!({"url": HOOK}), http.clone())
            .notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap();
        assert!(http.single().body_json().get("botIconImage").is_none());
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let http = RecordingHttp::with_responses(vec![status(502, "bad gateway")]);
        let err = notifier(json!({"url": HOOK}), http)
            .notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn debug_hides_hook_token() {
        let n = notifier(json!({"url": HOOK}), RecordingHttp::new());
        assert!(!format!("{:?}", n).contains("token"));
    }
}
