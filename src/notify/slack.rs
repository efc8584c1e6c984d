//! Slack notifier: incoming webhook or `chat.postMessage` with a bot token.

use crate::alert::AlertGroup;
use crate::config::{
    DelimitedList, SecretResolver, SecretString, decode, validate_field_template,
    validate_http_url,
};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{
    Notifier, NotifierBase, NotifierDeps, send_checked, skip_resolved, truncate_field,
};
use crate::template::{DEFAULT_MESSAGE, DEFAULT_TITLE};
use crate::transport::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub const SLACK_API_URL: &str = "https://slack.com/api/chat.postMessage";

/// Slack rejects attachment titles longer than this.
const MAX_TITLE_CHARS: usize = 1024;

const DEFAULT_COLOR: &str =
    r##"{% if status == "firing" %}#D63232{% else %}#36a64f{% endif %}"##;

/// `ok:false` error codes that will not go away on retry.
const PERMANENT_API_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "channel_not_found",
    "is_archived",
    "no_permission",
    "missing_scope",
];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    url: String,
    #[serde(default)]
    token: String,
    #[serde(default)]
    endpoint_url: String,
    #[serde(default)]
    recipient: String,
    #[serde(default)]
    username: String,
    #[serde(default, rename = "icon_emoji")]
    icon_emoji: String,
    #[serde(default, rename = "icon_url")]
    icon_url: String,
    #[serde(default)]
    mention_channel: String,
    #[serde(default)]
    mention_users: DelimitedList,
    #[serde(default)]
    mention_groups: DelimitedList,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackTarget {
    Webhook(SecretString),
    Api { url: String, token: SecretString },
}

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub target: SlackTarget,
    pub recipient: String,
    pub username: String,
    pub icon_emoji: String,
    pub icon_url: String,
    pub mention_channel: Option<String>,
    pub mention_users: Vec<String>,
    pub mention_groups: Vec<String>,
    pub title: Option<String>,
    pub text: Option<String>,
    pub color: Option<String>,
}

impl SlackConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;

        let url = secrets.get("url", &raw.url).trim().to_string();
        let token = secrets.get("token", &raw.token).trim().to_string();
        let target = match (url.is_empty(), token.is_empty()) {
            (false, _) => {
                validate_http_url("url", &url)?;
                SlackTarget::Webhook(SecretString::new(url))
            }
            (true, false) => {
                if raw.recipient.trim().is_empty() {
                    return Err(SettingsError::Missing("recipient"));
                }
                let endpoint = match raw.endpoint_url.trim() {
                    "" => SLACK_API_URL.to_string(),
                    other => other.to_string(),
                };
                validate_http_url("endpointUrl", &endpoint)?;
                SlackTarget::Api {
                    url: endpoint,
                    token: SecretString::new(token),
                }
            }
            (true, true) => {
                return Err(SettingsError::Conflict(
                    "either url or token must be set".to_string(),
                ));
            }
        };

        let mention_channel = match raw.mention_channel.trim() {
            "" => None,
            value @ ("here" | "channel") => Some(value.to_string()),
            other => {
                return Err(SettingsError::invalid(
                    "mentionChannel",
                    format!("expected 'here' or 'channel', got '{}'", other),
                ));
            }
        };
        if !raw.icon_url.is_empty() {
            validate_http_url("icon_url", &raw.icon_url)?;
        }
        for (field, source) in [("title", &raw.title), ("text", &raw.text), ("color", &raw.color)] {
            if let Some(source) = source {
                validate_field_template(field, source)?;
            }
        }

        Ok(Self {
            target,
            recipient: raw.recipient.trim().to_string(),
            username: raw.username,
            icon_emoji: raw.icon_emoji,
            icon_url: raw.icon_url,
            mention_channel,
            mention_users: raw.mention_users.iter().map(str::to_string).collect(),
            mention_groups: raw.mention_groups.iter().map(str::to_string).collect(),
            title: raw.title,
            text: raw.text,
            color: raw.color,
        })
    }

    /// Mention prefix for the message text, empty when nobody is mentioned.
    fn mentions(&self) -> String {
        let mut parts = Vec::new();
        if let Some(channel) = &self.mention_channel {
            parts.push(format!("<!{}|{}>", channel, channel));
        }
        parts.extend(self.mention_users.iter().map(|u| format!("<@{}>", u)));
        parts.extend(self.mention_groups.iter().map(|g| format!("<!subteam^{}>", g)));
        parts.join(" ")
    }
}

#[derive(Debug, Serialize)]
pub struct SlackMessage {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub icon_emoji: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub icon_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
pub struct SlackAttachment {
    pub color: String,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title_link: String,
    pub text: String,
    pub fallback: String,
    pub footer: &'static str,
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: String,
}

/// Interprets a 2xx Slack answer. Webhooks reply with plain `ok`, the API
/// with `{"ok": bool, "error": ...}`.
fn check_body(response: &HttpResponse) -> Result<(), NotifyError> {
    let Ok(body) = response.json::<ApiResponse>() else {
        return Ok(());
    };
    if body.ok {
        return Ok(());
    }
    let message = format!("slack returned error: {}", body.error);
    if PERMANENT_API_ERRORS.contains(&body.error.as_str()) {
        Err(NotifyError::Permanent(message))
    } else {
        Err(NotifyError::Retryable(message))
    }
}

pub struct SlackNotifier {
    base: NotifierBase,
    config: SlackConfig,
    deps: NotifierDeps,
}

impl SlackNotifier {
    pub fn new(base: NotifierBase, config: SlackConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_slack",
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
            let text = tmpl.render_or_default(self.config.text.as_deref(), DEFAULT_MESSAGE);
            let color = tmpl.render_or_default(self.config.color.as_deref(), DEFAULT_COLOR);
            tmpl.warn_on_error(&self.base.name, self.notifier_type());

            let title = truncate_field(&self.base, "title", &title, MAX_TITLE_CHARS);
            let title_link = ctx
                .alerts
                .iter()
                .find_map(|a| a.generator_url.clone())
                .unwrap_or_else(|| ctx.external_url.clone());
            let image_url = ctx.alerts.iter().find_map(|a| a.image_url.clone());

            let message = SlackMessage {
                channel: self.config.recipient.clone(),
                username: self.config.username.clone(),
                icon_emoji: self.config.icon_emoji.clone(),
                icon_url: self.config.icon_url.clone(),
                text: self.config.mentions(),
                attachments: vec![SlackAttachment {
                    color,
                    fallback: title.clone(),
                    title,
                    title_link,
                    text,
                    footer: "herald",
                    ts: self.deps.clock.now().timestamp(),
                    image_url,
                }],
            };

            let request = match &self.config.target {
                SlackTarget::Webhook(url) => HttpRequest::post(url.expose()),
                SlackTarget::Api { url, token } => {
                    HttpRequest::post(url.as_str()).bearer_auth(token.clone())
                }
            }
            .json(&message)?;

            let response = send_checked(self.deps.http.as_ref(), cancel, "slack", request).await?;
            check_body(&response)?;
            tracing::debug!("Slack notification sent");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for SlackNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.config.target {
            SlackTarget::Webhook(_) => "webhook",
            SlackTarget::Api { .. } => "api",
        };
        f.debug_struct("SlackNotifier")
            .field("name", &self.base.name)
            .field("mode", &mode)
            .field("recipient", &self.config.recipient)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReceiverKind, SecureSettings};
    use crate::notify::testing::{self, RecordingHttp, StaticImages, ok, status};
    use crate::transport::HttpAuth;
    use serde_json::json;
    use std::sync::Arc;

    fn notifier_with(
        settings: serde_json::Value,
        secrets: SecureSettings,
        http: Arc<RecordingHttp>,
    ) -> SlackNotifier {
        let config = SlackConfig::from_settings(&settings, &secrets).unwrap();
        SlackNotifier::new(testing::base(ReceiverKind::Slack), config, testing::deps(http))
    }

    #[test]
    fn settings_need_url_or_token() {
        let err = SlackConfig::from_settings(&json!({}), &SecureSettings::default()).unwrap_err();
        assert!(matches!(err, SettingsError::Conflict(_)));
    }

    #[test]
    fn token_mode_requires_recipient() {
        let secrets = SecureSettings::from_pairs([("token", "xoxb-1")]);
        let err = SlackConfig::from_settings(&json!({}), &secrets).unwrap_err();
        assert!(matches!(err, SettingsError::Missing("recipient")));
    }

    #[test]
    fn mention_channel_is_validated() {
        let err = SlackConfig::from_settings(
            &json!({"url": "https://hooks.slack.com/services/x", "mentionChannel": "everyone"}),
            &SecureSettings::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("mentionChannel"));
    }

    #[tokio::test]
    async fn webhook_mode_posts_attachment() {
        let http = RecordingHttp::with_responses(vec![ok("ok")]);
        let n = notifier_with(
            json!({
                "url": "https://hooks.slack.com/services/T0/B0/x",
                "mentionChannel": "here",
                "mentionUsers": "U1,U2",
                "mentionGroups": "G1"
            }),
            SecureSettings::default(),
            http.clone(),
        );
        n.notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap();

        let req = http.single();
        assert_eq!(req.url, "https://hooks.slack.com/services/T0/B0/x");
        assert_eq!(req.auth, HttpAuth::None);
        let body = req.body_json();
        assert_eq!(body["text"], "<!here|here> <@U1> <@U2> <!subteam^G1>");
        let attachment = &body["attachments"][0];
        assert_eq!(attachment["title"], "[FIRING:1] HighCPU eu-1");
        assert_eq!(attachment["color"], "#D63232");
        assert_eq!(attachment["title_link"], "https://grafana.example.com/alerting/1/view");
        assert_eq!(attachment["ts"], testing::t0().timestamp());
        assert!(body.get("channel").is_none());
    }

    #[tokio::test]
    async fn api_mode_uses_bearer_token_and_channel() {
        let http = RecordingHttp::with_responses(vec![ok(r#"{"ok": true}"#)]);
        let secrets = SecureSettings::from_pairs([("token", "xoxb-secret")]);
        let n = notifier_with(json!({"recipient": "#ops"}), secrets, http.clone());
        n.notify(&CancellationToken::new(), &testing::resolved_group())
            .await
            .unwrap();

        let req = http.single();
        assert_eq!(req.url, SLACK_API_URL);
        assert_eq!(req.auth, HttpAuth::Bearer(SecretString::from("xoxb-secret")));
        let body = req.body_json();
        assert_eq!(body["channel"], "#ops");
        assert_eq!(body["attachments"][0]["color"], "#36a64f");
    }

    #[tokio::test]
    async fn ok_false_body_is_an_error() {
        let http = RecordingHttp::with_responses(vec![
            ok(r#"{"ok": false, "error": "channel_not_found"}"#),
            ok(r#"{"ok": false, "error": "ratelimited"}"#),
        ]);
        let secrets = SecureSettings::from_pairs([("token", "xoxb-secret")]);
        let n = notifier_with(json!({"recipient": "#ops"}), secrets, http.clone());
        let cancel = CancellationToken::new();
        let group = testing::firing_group();

        let err = n.notify(&cancel, &group).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("channel_not_found"));
        assert!(n.notify(&cancel, &group).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn long_title_is_truncated() {
        let http = RecordingHttp::new();
        let n = notifier_with(
            json!({"url": "https://hooks.slack.com/x", "title": "{% for i in range(2000) %}x{% endfor %}"}),
            SecureSettings::default(),
            http.clone(),
        );
        n.notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap();
        let title = http.single().body_json()["attachments"][0]["title"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
        assert!(title.ends_with('…'));
    }

    #[tokio::test]
    async fn image_url_is_attached() {
        let http = RecordingHttp::new();
        let config = SlackConfig::from_settings(
            &json!({"url": "https://hooks.slack.com/x"}),
            &SecureSettings::default(),
        )
        .unwrap();
        let mut deps = testing::deps(http.clone());
        deps.images = Arc::new(StaticImages {
            url: Some("https://images.example.com/panel.png".to_string()),
            ..Default::default()
        });
        let n = SlackNotifier::new(testing::base(ReceiverKind::Slack), config, deps);

        let mut alert = testing::alert("web-1", crate::alert::AlertStatus::Firing);
        alert.image_ref = Some("panel-1".to_string());
        let group = AlertGroup::new(alert.labels.clone(), vec![alert]).unwrap();
        n.notify(&CancellationToken::new(), &group).await.unwrap();

        assert_eq!(
            http.single().body_json()["attachments"][0]["image_url"],
            "https://images.example.com/panel.png"
        );
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let http = RecordingHttp::with_responses(vec![status(500, "oops")]);
        let n = notifier_with(
            json!({"url": "https://hooks.slack.com/x"}),
            SecureSettings::default(),
            http,
        );
        let err = n
            .notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
