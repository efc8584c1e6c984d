//! PagerDuty Events API v2 notifier.
//!
//! Every group maps to one PagerDuty alert through `dedup_key` (the group key
//! hash): firing groups send `trigger`, resolved groups send `resolve` for the
//! same key.

use crate::alert::AlertGroup;
use crate::config::{
    SecretResolver, SecretString, decode, require, validate_field_template, validate_http_url,
};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{
    Notifier, NotifierBase, NotifierDeps, send_checked_rejecting, skip_resolved, truncate_field,
};
use crate::template::{DEFAULT_MESSAGE, DEFAULT_TITLE};
use crate::transport::HttpRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub const PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

/// PagerDuty limit for `payload.summary`.
/// Events API v2 answers 400 when the event itself is invalid.
const REJECTED_STATUSES: &[u16] = &[400];
const MAX_SUMMARY_CHARS: usize = 1024;

const DEFAULT_SEVERITY: &str = "critical";
const SEVERITIES: &[&str] = &["critical", "error", "warning", "info"];
const DEFAULT_SOURCE: &str = "herald";
const DEFAULT_CLIENT: &str = "Herald";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    integration_key: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    component: Option<String>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    client: Option<String>,
    #[serde(default, rename = "client_url")]
    client_url: Option<String>,
    #[serde(default)]
    details: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PagerDutyConfig {
    pub integration_key: SecretString,
    pub url: String,
    pub severity: Option<String>,
    pub class: Option<String>,
    pub component: Option<String>,
    pub group: Option<String>,
    pub summary: Option<String>,
    pub source: Option<String>,
    pub client: Option<String>,
    pub client_url: Option<String>,
    /// Extra `custom_details` entries; values are templates.
    pub details: BTreeMap<String, String>,
}

impl PagerDutyConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;
        let integration_key = require(
            "integrationKey",
            &secrets.get("integrationKey", &raw.integration_key),
        )?;
        let url = match raw.url.trim() {
            "" => PAGERDUTY_EVENTS_URL.to_string(),
            url => url.to_string(),
        };
        validate_http_url("url", &url)?;

        for (field, source) in [
            ("severity", &raw.severity),
            ("class", &raw.class),
            ("component", &raw.component),
            ("group", &raw.group),
            ("summary", &raw.summary),
            ("source", &raw.source),
            ("client", &raw.client),
            ("client_url", &raw.client_url),
        ] {
            if let Some(source) = source {
                validate_field_template(field, source)?;
            }
        }
        for source in raw.details.values() {
            validate_field_template("details", source)?;
        }

        Ok(Self {
            integration_key: SecretString::new(integration_key),
            url,
            severity: raw.severity,
            class: raw.class,
            component: raw.component,
            group: raw.group,
            summary: raw.summary,
            source: raw.source,
            client: raw.client,
            client_url: raw.client_url,
            details: raw.details,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct PagerDutyEvent {
    pub routing_key: String,
    pub dedup_key: String,
    pub event_action: &'static str,
    pub payload: EventPayload,
    pub client: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
}

#[derive(Debug, Serialize)]
pub struct EventPayload {
    pub summary: String,
    pub source: String,
    pub severity: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub class: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub component: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group: String,
    pub custom_details: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct Link {
    pub href: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct Image {
    pub src: String,
}

pub struct PagerDutyNotifier {
    base: NotifierBase,
    config: PagerDutyConfig,
    deps: NotifierDeps,
}

impl PagerDutyNotifier {
    pub fn new(base: NotifierBase, config: PagerDutyConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }

    /// Rendered severity, `critical` when it is not one PagerDuty accepts.
    fn severity(&self, rendered: String) -> String {
        let lower = rendered.trim().to_lowercase();
        if SEVERITIES.contains(&lower.as_str()) {
            return lower;
        }
        if !lower.is_empty() {
            tracing::warn!(
                notifier_name = %self.base.name,
                severity = %rendered,
                "Unknown PagerDuty severity, using critical"
            );
        }
        DEFAULT_SEVERITY.to_string()
    }
}

#[async_trait]
impl Notifier for PagerDutyNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let event_action = if group.is_resolved() { "resolve" } else { "trigger" };
        let span = tracing::info_span!(
            "notify_pagerduty",
            notifier_name = %self.base.name,
            group_key = %group.key(),
            event_action = event_action
        );

        async {
            let ctx = self
                .deps
                .render_context_with_images(cancel, &self.base, group)
                .await;
            let mut tmpl = self.deps.templates.renderer(&ctx);
            let summary = tmpl.render_or_default(self.config.summary.as_deref(), DEFAULT_TITLE);
            let severity = tmpl.render_or_default(self.config.severity.as_deref(), DEFAULT_SEVERITY);
            let source = tmpl.render_or_default(self.config.source.as_deref(), DEFAULT_SOURCE);
            let client = tmpl.render_or_default(self.config.client.as_deref(), DEFAULT_CLIENT);
            let class = tmpl.render_or_default(self.config.class.as_deref(), "");
            let component = tmpl.render_or_default(self.config.component.as_deref(), "");
            let pd_group = tmpl.render_or_default(self.config.group.as_deref(), "");
            let client_url = match &self.config.client_url {
                Some(source) => tmpl.render_or_raw(source),
                None => ctx.external_url.clone(),
            };

            let mut custom_details = BTreeMap::new();
            custom_details.insert("firing".to_string(), tmpl.render(DEFAULT_MESSAGE));
            custom_details.insert("num_firing".to_string(), ctx.firing().count().to_string());
            custom_details.insert("num_resolved".to_string(), ctx.resolved().count().to_string());
            for (key, source) in &self.config.details {
                custom_details.insert(key.clone(), tmpl.render(source));
            }
            tmpl.warn_on_error(&self.base.name, self.notifier_type());

            let links = ctx
                .alerts
                .iter()
                .filter_map(|a| a.generator_url.clone())
                .take(1)
                .map(|href| Link {
                    href,
                    text: "Alert source".to_string(),
                })
                .collect();
            let images = ctx
                .alerts
                .iter()
                .filter_map(|a| a.image_url.clone())
                .map(|src| Image { src })
                .collect();

            let event = PagerDutyEvent {
                routing_key: self.config.integration_key.expose().to_string(),
                dedup_key: ctx.group_key_hash.clone(),
                event_action,
                payload: EventPayload {
                    summary: truncate_field(&self.base, "summary", &summary, MAX_SUMMARY_CHARS),
                    source,
                    severity: self.severity(severity),
                    class,
                    component,
                    group: pd_group,
                    custom_details,
                },
                client,
                client_url,
                links,
                images,
            };

            let request = HttpRequest::post(self.config.url.as_str()).json(&event)?;
            send_checked_rejecting(
                self.deps.http.as_ref(),
                cancel,
                "pagerduty",
                REJECTED_STATUSES,
                request,
            )
            .await?;
            tracing::debug!(dedup_key = %event.dedup_key, "PagerDuty event enqueued");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for PagerDutyNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagerDutyNotifier")
            .field("name", &self.base.name)
            .field("url", &self.config.url)
            .finish()
    }
}
