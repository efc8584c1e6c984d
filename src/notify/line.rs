//! LINE Notify notifier.

use crate::alert::AlertGroup;
use crate::config::{SecretResolver, SecretString, decode, require, validate_field_template};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{Notifier, NotifierBase, NotifierDeps, send_checked, skip_resolved};
use crate::template::{DEFAULT_MESSAGE, DEFAULT_TITLE};
use crate::transport::HttpRequest;
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub const LINE_NOTIFY_URL: &str = "https://notify-api.line.me/api/notify";

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    token: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LineConfig {
    pub token: SecretString,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: String,
}

impl LineConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;
        let token = require("token", &secrets.get("token", &raw.token))?;
        if let Some(title) = &raw.title {
            validate_field_template("title", title)?;
        }
        if let Some(description) = &raw.description {
            validate_field_template("description", description)?;
        }
        Ok(Self {
            token: SecretString::new(token),
            title: raw.title,
            description: raw.description,
            url: LINE_NOTIFY_URL.to_string(),
        })
    }
}

pub struct LineNotifier {
    base: NotifierBase,
    config: LineConfig,
    deps: NotifierDeps,
}

impl LineNotifier {
    pub fn new(base: NotifierBase, config: LineConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }
}

#[async_trait]
impl Notifier for LineNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_line",
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

            let message = if ctx.external_url.is_empty() {
                format!("{}\n\n{}", title, description)
            } else {
                format!("{}\n{}\n\n{}", title, ctx.external_url, description)
            };

            let request = HttpRequest::post(self.config.url.as_str())
                .bearer_auth(self.config.token.clone())
                .form(&[("message", message.as_str())]);
            send_checked(self.deps.http.as_ref(), cancel, "line", request).await?;
            tracing::debug!("LINE notification sent");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReceiverKind, SecureSettings};
    use crate::notify::testing::{self, RecordingHttp, status};
    use crate::transport::HttpAuth;
    use serde_json::json;

    fn notifier(http: std::sync::Arc<RecordingHttp>) -> LineNotifier {
        let secrets = SecureSettings::from_pairs([("token", "line-token")]);
        let config = LineConfig::from_settings(&json!({"title": "{{ status }}"}), &secrets).unwrap();
        LineNotifier::new(testing::base(ReceiverKind::Line), config, testing::deps(http))
    }

    #[test]
    fn settings_require_token() {
        let err = LineConfig::from_settings(&json!({}), &SecureSettings::default()).unwrap_err();
        assert!(matches!(err, SettingsError::Missing("token")));
    }

    #[tokio::test]
    async fn posts_form_encoded_message_with_bearer_token() {
        let http = RecordingHttp::new();
        notifier(http.clone())
            .notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap();

        let req = http.single();
        assert_eq!(req.url, LINE_NOTIFY_URL);
        assert_eq!(req.auth, HttpAuth::Bearer(SecretString::from("line-token")));
        assert_eq!(
            req.header_value("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        let body = String::from_utf8_lossy(&req.body).to_string();
        assert!(body.starts_with("message=firing%0Ahttps%3A%2F%2Fgrafana.example.com%0A%0A"));
    }

    #[tokio::test]
    async fn unauthorized_is_retryable() {
        let http = RecordingHttp::with_responses(vec![status(401, "invalid token")]);
        let err = notifier(http)
            .notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
