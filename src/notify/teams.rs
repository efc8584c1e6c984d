//! Microsoft Teams notifier (incoming webhook, MessageCard format).

use crate::alert::{AlertGroup, AlertStatus};
use crate::config::{SecretResolver, SecretString, decode, require, validate_field_template, validate_http_url};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{Notifier, NotifierBase, NotifierDeps, send_checked, skip_resolved};
use crate::template::{DEFAULT_MESSAGE, DEFAULT_TITLE};
use crate::transport::HttpRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const THEME_FIRING: &str = "D63232";
const THEME_RESOLVED: &str = "36A64F";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
struct RawSettings {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    sectiontitle: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TeamsConfig {
    pub url: SecretString,
    pub title: Option<String>,
    pub section_title: Option<String>,
    pub message: Option<String>,
}

impl TeamsConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;
        let url = require("url", &secrets.get("url", &raw.url))?;
        validate_http_url("url", &url)?;
        for (field, source) in [
            ("title", &raw.title),
            ("sectiontitle", &raw.sectiontitle),
            ("message", &raw.message),
        ] {
            if let Some(source) = source {
                validate_field_template(field, source)?;
            }
        }
        Ok(Self {
            url: SecretString::new(url),
            title: raw.title,
            section_title: raw.sectiontitle,
            message: raw.message,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct MessageCard {
    #[serde(rename = "@type")]
    pub card_type: &'static str,
    #[serde(rename = "@context")]
    pub context: &'static str,
    pub summary: String,
    pub title: String,
    #[serde(rename = "themeColor")]
    pub theme_color: &'static str,
    pub sections: Vec<CardSection>,
    #[serde(rename = "potentialAction", skip_serializing_if = "Vec::is_empty")]
    pub potential_action: Vec<CardAction>,
}

#[derive(Debug, Serialize)]
pub struct CardSection {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct CardAction {
    #[serde(rename = "@type")]
    pub action_type: &'static str,
    pub name: &'static str,
    pub targets: Vec<ActionTarget>,
}

#[derive(Debug, Serialize)]
pub struct ActionTarget {
    pub os: &'static str,
    pub uri: String,
}

pub struct TeamsNotifier {
    base: NotifierBase,
    config: TeamsConfig,
    deps: NotifierDeps,
}

impl TeamsNotifier {
    pub fn new(base: NotifierBase, config: TeamsConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }
}

#[async_trait]
impl Notifier for TeamsNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_teams",
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
            let section_title = self
                .config
                .section_title
                .as_deref()
                .map(|s| tmpl.render(s))
                .unwrap_or_default();
            let text = tmpl.render_or_default(self.config.message.as_deref(), DEFAULT_MESSAGE);
            let url = tmpl.render_or_raw(self.config.url.expose());
            tmpl.warn_on_error(&self.base.name, self.notifier_type());

            let link = ctx
                .alerts
                .iter()
                .find_map(|a| a.generator_url.clone())
                .or_else(|| (!ctx.external_url.is_empty()).then(|| ctx.external_url.clone()));

            let card = MessageCard {
                card_type: "MessageCard",
                context: "http://schema.org/extensions",
                summary: title.clone(),
                title,
                theme_color: match ctx.status {
                    AlertStatus::Firing => THEME_FIRING,
                    AlertStatus::Resolved => THEME_RESOLVED,
                },
                sections: vec![CardSection {
                    title: section_title,
                    text,
                }],
                potential_action: link
                    .map(|uri| CardAction {
                        action_type: "OpenUri",
                        name: "View Rule",
                        targets: vec![ActionTarget { os: "default", uri }],
                    })
                    .into_iter()
                    .collect(),
            };

            let request = HttpRequest::post(url).json(&card)?;
            send_checked(self.deps.http.as_ref(), cancel, "teams", request).await?;
            tracing::debug!("Teams notification sent");
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
    use crate::notify::testing::{self, RecordingHttp};
    use serde_json::json;

    fn notifier(settings: serde_json::Value, http: std::sync::Arc<RecordingHttp>) -> TeamsNotifier {
        let config = TeamsConfig::from_settings(&settings, &SecureSettings::default()).unwrap();
        TeamsNotifier::new(testing::base(ReceiverKind::Teams), config, testing::deps(http))
    }

    #[tokio::test]
    async fn builds_message_card() {
        let http = RecordingHttp::new();
        let n = notifier(
            json!({"url": "https://outlook.office.com/webhook/x", "sectiontitle": "{{ receiver }}"}),
            http.clone(),
        );
        n.notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap();

        let body = http.single().body_json();
        assert_eq!(body["@type"], "MessageCard");
        assert_eq!(body["themeColor"], THEME_FIRING);
        assert_eq!(body["title"], "[FIRING:1] HighCPU eu-1");
        assert_eq!(body["summary"], body["title"]);
        assert_eq!(body["sections"][0]["title"], "test-teams");
        assert_eq!(
            body["potentialAction"][0]["targets"][0]["uri"],
            "https://grafana.example.com/alerting/1/view"
        );
    }

    #[tokio::test]
    async fn resolved_card_is_green() {
        let http = RecordingHttp::new();
        let n = notifier(json!({"url": "https://outlook.office.com/webhook/x"}), http.clone());
        n.notify(&CancellationToken::new(), &testing::resolved_group())
            .await
            .unwrap();
        assert_eq!(http.single().body_json()["themeColor"], THEME_RESOLVED);
    }

    #[test]
    fn settings_reject_bad_template() {
        let err = TeamsConfig::from_settings(
            &json!({"url": "https://outlook.office.com/webhook/x", "message": "{% if %}"}),
            &SecureSettings::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("'message'"));
    }
}
