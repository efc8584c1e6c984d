//! Opsgenie Alert API notifier.
//!
//! Firing groups create an alert whose `alias` is the group key hash;
//! Opsgenie de-duplicates on it, so repeated notifications update the same
//! alert. Resolved groups close the alert by alias when `autoClose` is set.

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

pub const OPSGENIE_API_URL: &str = "https://api.opsgenie.com/v2/alerts";

const MAX_MESSAGE_CHARS: usize = 130;
const MAX_DESCRIPTION_CHARS: usize = 15000;

/// Alert label that overrides the priority when `overridePriority` is on.
pub const PRIORITY_LABEL: &str = "og_priority";
const PRIORITIES: &[&str] = &["P1", "P2", "P3", "P4", "P5"];

/// Alert API answers 400 or 422 for payloads it will never accept.
const REJECTED_STATUSES: &[u16] = &[400, 422];
const SOURCE: &str = "Herald";

/// Where alert labels are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendTagsAs {
    #[default]
    Tags,
    Details,
    Both,
}

impl SendTagsAs {
    fn tags(self) -> bool {
        matches!(self, SendTagsAs::Tags | SendTagsAs::Both)
    }

    fn details(self) -> bool {
        matches!(self, SendTagsAs::Details | SendTagsAs::Both)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    api_url: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    auto_close: Option<bool>,
    #[serde(default)]
    override_priority: Option<bool>,
    #[serde(default)]
    send_tags_as: Option<String>,
    #[serde(default)]
    responders: Vec<RawResponder>,
}

#[derive(Debug, Default, Deserialize)]
struct RawResponder {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    username: String,
}

/// One responder in the Opsgenie request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Responder {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
}

impl Responder {
    fn team(name: &str) -> Self {
        Self {
            kind: "team".to_string(),
            id: String::new(),
            name: name.to_string(),
            username: String::new(),
        }
    }
}

fn parse_responders(raw: Vec<RawResponder>) -> Result<Vec<Responder>, SettingsError> {
    let mut responders = Vec::new();
    for (index, r) in raw.into_iter().enumerate() {
        let kind = r.kind.trim().to_lowercase();
        if r.id.trim().is_empty() && r.name.trim().is_empty() && r.username.trim().is_empty() {
            return Err(SettingsError::invalid(
                "responders",
                format!("responder at index {} needs an id, name or username", index),
            ));
        }
        match kind.as_str() {
            // Comma-separated team names, expanded to one responder each.
            "teams" => {
                responders.extend(
                    r.name
                        .split(',')
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(Responder::team),
                );
            }
            "team" | "user" | "escalation" | "schedule" => {
                if !r.username.trim().is_empty() && kind != "user" {
                    return Err(SettingsError::invalid(
                        "responders",
                        format!("username is only allowed for user responders (index {})", index),
                    ));
                }
                responders.push(Responder {
                    kind,
                    id: r.id.trim().to_string(),
                    name: r.name.trim().to_string(),
                    username: r.username.trim().to_string(),
                });
            }
            other => {
                return Err(SettingsError::invalid(
                    "responders",
                    format!("unsupported responder type '{}' at index {}", other, index),
                ));
            }
        }
    }
    Ok(responders)
}

#[derive(Debug, Clone)]
pub struct OpsgenieConfig {
    pub api_key: SecretString,
    pub api_url: String,
    pub message: Option<String>,
    pub description: Option<String>,
    /// Close the alert when the group resolves. Independent from the
    /// receiver's `disable_resolve_message`, which suppresses the call
    /// altogether.
    pub auto_close: bool,
    pub override_priority: bool,
    pub send_tags_as: SendTagsAs,
    pub responders: Vec<Responder>,
}

impl OpsgenieConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;
        let api_key = require("apiKey", &secrets.get("apiKey", &raw.api_key))?;
        let api_url = match raw.api_url.trim().trim_end_matches('/') {
            "" => OPSGENIE_API_URL.to_string(),
            url => url.to_string(),
        };
        validate_http_url("apiUrl", &api_url)?;

        let send_tags_as = match raw.send_tags_as.as_deref().map(str::trim) {
            None | Some("") => SendTagsAs::default(),
            Some(value) => serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
                .map_err(|_| {
                    SettingsError::invalid(
                        "sendTagsAs",
                        format!("'{}' is not one of tags, details, both", value),
                    )
                })?,
        };

        if let Some(message) = &raw.message {
            validate_field_template("message", message)?;
        }
        if let Some(description) = &raw.description {
            validate_field_template("description", description)?;
        }

        Ok(Self {
            api_key: SecretString::new(api_key),
            api_url,
            message: raw.message,
            description: raw.description,
            auto_close: raw.auto_close.unwrap_or(true),
            override_priority: raw.override_priority.unwrap_or(true),
            send_tags_as,
            responders: parse_responders(raw.responders)?,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CreateAlert {
    pub message: String,
    pub alias: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub source: &'static str,
    pub details: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub responders: Vec<Responder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

#[derive(Debug, Serialize)]
struct CloseAlert {
    source: &'static str,
}

pub struct OpsgenieNotifier {
    base: NotifierBase,
    config: OpsgenieConfig,
    deps: NotifierDeps,
}

impl OpsgenieNotifier {
    pub fn new(base: NotifierBase, config: OpsgenieConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }

    fn authorized(&self, request: HttpRequest) -> HttpRequest {
        request.header(
            "Authorization",
            format!("GenieKey {}", self.config.api_key.expose()),
        )
    }

    fn create_body(&self, group: &AlertGroup) -> CreateAlert {
        let ctx = self.deps.render_context(&self.base, group);
        let mut tmpl = self.deps.templates.renderer(&ctx);
        let message = tmpl.render_or_default(self.config.message.as_deref(), DEFAULT_TITLE);
        let description = tmpl.render_or_default(self.config.description.as_deref(), DEFAULT_MESSAGE);
        tmpl.warn_on_error(&self.base.name, self.notifier_type());

        // Labels of all alerts; the first value seen wins.
        let mut labels = BTreeMap::new();
        for alert in group.alerts() {
            for (k, v) in &alert.labels {
                labels.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        let priority = if self.config.override_priority {
            labels
                .get(PRIORITY_LABEL)
                .map(|p| p.trim().to_uppercase())
                .filter(|p| PRIORITIES.contains(&p.as_str()))
        } else {
            None
        };

        let mut details = BTreeMap::new();
        details.insert("url".to_string(), ctx.external_url.clone());
        let mut tags = Vec::new();
        for (k, v) in &labels {
            if self.config.send_tags_as.tags() {
                tags.push(format!("{}:{}", k, v));
            }
            if self.config.send_tags_as.details() {
                details.insert(k.clone(), v.clone());
            }
        }

        CreateAlert {
            message: truncate_field(&self.base, "message", message.trim(), MAX_MESSAGE_CHARS),
            alias: ctx.group_key_hash.clone(),
            description: truncate_field(&self.base, "description", &description, MAX_DESCRIPTION_CHARS),
            tags,
            source: SOURCE,
            details,
            responders: self.config.responders.clone(),
            priority,
        }
    }
}

#[async_trait]
impl Notifier for OpsgenieNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_opsgenie",
            notifier_name = %self.base.name,
            group_key = %group.key()
        );

        async {
            let alias = group.key_hash();
            let request = if group.is_resolved() {
                if !self.config.auto_close {
                    tracing::debug!("Resolved group with autoClose disabled, nothing to send");
                    return Ok(());
                }
                let url = format!(
                    "{}/{}/close?identifierType=alias",
                    self.config.api_url,
                    urlencoding::encode(&alias)
                );
                HttpRequest::post(url).json(&CloseAlert { source: SOURCE })?
            } else {
                HttpRequest::post(self.config.api_url.as_str()).json(&self.create_body(group))?
            };

            send_checked_rejecting(
                self.deps.http.as_ref(),
                cancel,
                "opsgenie",
                REJECTED_STATUSES,
                self.authorized(request),
            )
            .await?;
            tracing::debug!(alias = %alias, resolved = group.is_resolved(), "Opsgenie request accepted");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for OpsgenieNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpsgenieNotifier")
            .field("name", &self.base.name)
            .field("api_url", &self.config.api_url)
            .field("api_key", &self.config.api_key)
            .finish()
    }
}
