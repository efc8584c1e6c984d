//! JIRA issue notifier.
//!
//! Unlike the chat integrations, JIRA tracks a long-lived issue per alert
//! group. Each notification first searches for the issue carrying the
//! group's `ALERT{hash}` label, then acts on what it finds:
//!
//! | issue     | firing                        | resolved                          |
//! |-----------|-------------------------------|-----------------------------------|
//! | not found | create                        | nothing                           |
//! | open      | update                        | update, then resolve transition   |
//! | done      | update, then reopen transition| update                            |
//!
//! Transitions are looked up by exact name. Issues closed with the
//! configured "won't fix" resolution are never reopened or transitioned.
//! The issue state is queried on every call; nothing is cached.

use crate::alert::AlertGroup;
use crate::config::{
    SecretResolver, SecretString, decode, require, validate_field_template, validate_http_url,
};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{
    Notifier, NotifierBase, NotifierDeps, send_checked, skip_resolved, truncate_field,
};
use crate::template::{DEFAULT_MESSAGE, DEFAULT_TITLE};
use crate::transport::HttpRequest;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const MAX_SUMMARY_CHARS: usize = 255;
const MAX_DESCRIPTION_CHARS: usize = 32767;

const DEFAULT_ISSUE_TYPE: &str = "Bug";
const DEFAULT_REOPEN_DURATION: Duration = Duration::from_secs(10 * 60);

/// Label identifying the issue of one alert group.
pub fn dedup_label(group_key_hash: &str) -> String {
    format!("ALERT{{{}}}", group_key_hash)
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    api_url: String,
    #[serde(default)]
    project: String,
    #[serde(default)]
    issue_type: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    reopen_transition: Option<String>,
    #[serde(default)]
    resolve_transition: Option<String>,
    #[serde(default)]
    wont_fix_resolution: Option<String>,
    #[serde(default, with = "humantime_serde")]
    reopen_duration: Option<Duration>,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    user: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    api_token: String,
}

#[derive(Clone, PartialEq, Eq)]
pub enum JiraAuth {
    Basic { user: String, password: SecretString },
    Bearer(SecretString),
}

impl std::fmt::Debug for JiraAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JiraAuth::Basic { user, .. } => f.debug_struct("Basic").field("user", user).finish(),
            JiraAuth::Bearer(_) => f.write_str("Bearer([REDACTED])"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JiraConfig {
    /// REST API base, e.g. `https://example.atlassian.net/rest/api/2`.
    pub api_url: String,
    pub project: String,
    pub issue_type: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    /// Label templates; the dedup label is always added.
    pub labels: Vec<String>,
    pub priority: Option<String>,
    pub reopen_transition: Option<String>,
    pub resolve_transition: Option<String>,
    pub wont_fix_resolution: Option<String>,
    /// Done issues resolved longer ago than this are not matched, so a new
    /// issue is created instead. Zero matches done issues of any age.
    pub reopen_duration: Duration,
    /// Extra issue fields sent verbatim on create.
    pub fields: Map<String, Value>,
    pub auth: JiraAuth,
}

impl JiraConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;

        let api_url = require("api_url", &raw.api_url)?
            .trim_end_matches('/')
            .to_string();
        validate_http_url("api_url", &api_url)?;
        let project = require("project", &raw.project)?;
        let issue_type = match raw.issue_type.trim() {
            "" => DEFAULT_ISSUE_TYPE.to_string(),
            t => t.to_string(),
        };

        let password = secrets.get("password", &raw.password);
        let api_token = secrets.get("api_token", &raw.api_token);
        let auth = match (raw.user.trim(), password.trim(), api_token.trim()) {
            (_, p, t) if !p.is_empty() && !t.is_empty() => {
                return Err(SettingsError::Conflict(
                    "set either user/password or api_token, not both".to_string(),
                ));
            }
            (_, "", "") => return Err(SettingsError::Missing("api_token")),
            ("", p, _) if !p.is_empty() => return Err(SettingsError::Missing("user")),
            (user, p, "") => JiraAuth::Basic {
                user: user.to_string(),
                password: SecretString::new(p.to_string()),
            },
            (_, _, t) => JiraAuth::Bearer(SecretString::new(t.to_string())),
        };

        for (field, source) in [
            ("summary", &raw.summary),
            ("description", &raw.description),
            ("priority", &raw.priority),
        ] {
            if let Some(source) = source {
                validate_field_template(field, source)?;
            }
        }
        for label in &raw.labels {
            validate_field_template("labels", label)?;
        }

        let non_blank = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        Ok(Self {
            api_url,
            project,
            issue_type,
            summary: raw.summary,
            description: raw.description,
            labels: raw.labels,
            priority: raw.priority,
            reopen_transition: non_blank(raw.reopen_transition),
            resolve_transition: non_blank(raw.resolve_transition),
            wont_fix_resolution: non_blank(raw.wont_fix_resolution),
            reopen_duration: raw.reopen_duration.unwrap_or(DEFAULT_REOPEN_DURATION),
            fields: raw.fields,
            auth,
        })
    }

    /// API v3 expects descriptions in Atlassian Document Format.
    fn uses_adf(&self) -> bool {
        self.api_url.ends_with("/3")
    }
}

// =============================================================================
// Search
// =============================================================================

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    issues: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    key: String,
    #[serde(default)]
    fields: IssueFields,
}

#[derive(Debug, Default, Deserialize)]
struct IssueFields {
    #[serde(default)]
    status: Option<IssueStatus>,
    #[serde(default)]
    resolution: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct IssueStatus {
    #[serde(default, rename = "statusCategory")]
    category: Option<StatusCategory>,
}

#[derive(Debug, Deserialize)]
struct StatusCategory {
    #[serde(default)]
    key: String,
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Transitions {
    #[serde(default)]
    transitions: Vec<Transition>,
}

#[derive(Debug, Deserialize)]
struct Transition {
    id: String,
    #[serde(default)]
    name: String,
}

/// What the search found for the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueState {
    NotFound,
    FoundOpen { key: String },
    FoundDone { key: String, resolution: Option<String> },
}

impl IssueState {
    fn from_search(result: SearchResult) -> Self {
        let Some(issue) = result.issues.into_iter().next() else {
            return IssueState::NotFound;
        };
        let done = issue
            .fields
            .status
            .and_then(|s| s.category)
            .is_some_and(|c| c.key.eq_ignore_ascii_case("done"));
        if done {
            IssueState::FoundDone {
                key: issue.key,
                resolution: issue.fields.resolution.map(|r| r.name),
            }
        } else {
            IssueState::FoundOpen { key: issue.key }
        }
    }
}

/// Rendered issue content for one notification.
struct IssueContent {
    summary: String,
    description: Value,
    labels: Vec<String>,
    priority: Option<String>,
}

// =============================================================================
// Notifier
// =============================================================================

pub struct JiraNotifier {
    base: NotifierBase,
    config: JiraConfig,
    deps: NotifierDeps,
}

impl JiraNotifier {
    pub fn new(base: NotifierBase, config: JiraConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }

    fn authorized(&self, request: HttpRequest) -> HttpRequest {
        match &self.config.auth {
            JiraAuth::Basic { user, password } => request.basic_auth(user.as_str(), password.clone()),
            JiraAuth::Bearer(token) => request.bearer_auth(token.clone()),
        }
    }

    async fn call(
        &self,
        cancel: &CancellationToken,
        request: HttpRequest,
    ) -> Result<crate::transport::HttpResponse, NotifyError> {
        send_checked(self.deps.http.as_ref(), cancel, "jira", self.authorized(request)).await
    }

    fn search_jql(&self, label: &str) -> String {
        let mut jql = format!(
            "labels = \"{}\" AND project = \"{}\"",
            label,
            self.config.project.replace('"', "\\\"")
        );
        let minutes = self.config.reopen_duration.as_secs() / 60;
        if minutes > 0 {
            jql.push_str(&format!(
                " AND (resolutiondate is EMPTY OR resolutiondate >= -{}m)",
                minutes
            ));
        }
        jql.push_str(" ORDER BY status ASC, resolutiondate DESC");
        jql
    }

    async fn search(&self, cancel: &CancellationToken, label: &str) -> Result<IssueState, NotifyError> {
        let body = json!({
            "jql": self.search_jql(label),
            "fields": ["status", "resolution"],
            "maxResults": 2,
        });
        let request = HttpRequest::post(format!("{}/search", self.config.api_url)).json(&body)?;
        let response = self.call(cancel, request).await?;
        let result: SearchResult = response
            .json()
            .map_err(|e| NotifyError::Retryable(format!("unexpected jira search response: {}", e)))?;
        if result.issues.len() > 1 {
            tracing::warn!(label = %label, "More than one JIRA issue carries the alert label, using the first");
        }
        Ok(IssueState::from_search(result))
    }

    fn content(&self, group: &AlertGroup) -> IssueContent {
        let ctx = self.deps.render_context(&self.base, group);
        let mut tmpl = self.deps.templates.renderer(&ctx);
        let summary = tmpl.render_or_default(self.config.summary.as_deref(), DEFAULT_TITLE);
        let description = tmpl.render_or_default(self.config.description.as_deref(), DEFAULT_MESSAGE);
        let priority = self
            .config
            .priority
            .as_deref()
            .map(|p| tmpl.render(p).trim().to_string())
            .filter(|p| !p.is_empty());
        let alert_label = dedup_label(&ctx.group_key_hash);
        let mut seen = HashSet::new();
        let mut labels: Vec<String> = self
            .config
            .labels
            .iter()
            .map(|l| tmpl.render(l).trim().replace(char::is_whitespace, "_"))
            .filter(|l| !l.is_empty() && *l != alert_label && seen.insert(l.clone()))
            .collect();
        tmpl.warn_on_error(&self.base.name, self.notifier_type());
        labels.push(alert_label);

        let description = truncate_field(&self.base, "description", &description, MAX_DESCRIPTION_CHARS);
        IssueContent {
            summary: truncate_field(&self.base, "summary", summary.trim(), MAX_SUMMARY_CHARS),
            description: if self.config.uses_adf() {
                adf_document(&description)
            } else {
                Value::String(description)
            },
            labels,
            priority,
        }
    }

    fn common_fields(&self, content: &IssueContent) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("summary".to_string(), json!(content.summary));
        fields.insert("description".to_string(), content.description.clone());
        fields.insert("labels".to_string(), json!(content.labels));
        if let Some(priority) = &content.priority {
            fields.insert("priority".to_string(), json!({"name": priority}));
        }
        fields
    }

    async fn create(&self, cancel: &CancellationToken, content: &IssueContent) -> Result<(), NotifyError> {
        let mut fields = self.config.fields.clone();
        fields.insert("project".to_string(), json!({"key": self.config.project}));
        fields.insert("issuetype".to_string(), json!({"name": self.config.issue_type}));
        fields.extend(self.common_fields(content));

        let request = HttpRequest::post(format!("{}/issue", self.config.api_url))
            .json(&json!({ "fields": fields }))?;
        let response = self.call(cancel, request).await?;
        let key = response
            .json::<BTreeMap<String, Value>>()
            .ok()
            .and_then(|b| b.get("key").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        tracing::info!(issue = %key, "Created JIRA issue");
        Ok(())
    }

    async fn update(
        &self,
        cancel: &CancellationToken,
        key: &str,
        content: &IssueContent,
    ) -> Result<(), NotifyError> {
        let request = HttpRequest::put(self.issue_url(key))
            .json(&json!({ "fields": self.common_fields(content) }))?;
        self.call(cancel, request).await?;
        tracing::debug!(issue = %key, "Updated JIRA issue");
        Ok(())
    }

    /// Applies the transition called `name` to the issue.
    ///
    /// A transition missing from the issue's workflow is a permanent error.
    async fn transition(
        &self,
        cancel: &CancellationToken,
        key: &str,
        name: &str,
    ) -> Result<(), NotifyError> {
        let url = format!("{}/transitions", self.issue_url(key));
        let response = self.call(cancel, HttpRequest::get(url.as_str())).await?;
        let transitions: Transitions = response.json().map_err(|e| {
            NotifyError::Retryable(format!("unexpected jira transitions response: {}", e))
        })?;
        let Some(transition) = transitions.transitions.into_iter().find(|t| t.name == name) else {
            return Err(NotifyError::Permanent(format!(
                "transition '{}' is not available for issue {}",
                name, key
            )));
        };

        let request = HttpRequest::post(url).json(&json!({"transition": {"id": transition.id}}))?;
        self.call(cancel, request).await?;
        tracing::info!(issue = %key, transition = %name, "Transitioned JIRA issue");
        Ok(())
    }

    fn issue_url(&self, key: &str) -> String {
        format!("{}/issue/{}", self.config.api_url, urlencoding::encode(key))
    }

    fn is_wont_fix(&self, resolution: Option<&str>) -> bool {
        match (&self.config.wont_fix_resolution, resolution) {
            (Some(wont_fix), Some(resolution)) => wont_fix.eq_ignore_ascii_case(resolution),
            _ => false,
        }
    }
}

/// Wraps plain text into a minimal Atlassian Document Format document.
fn adf_document(text: &str) -> Value {
    let paragraphs: Vec<Value> = text
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .map(|p| json!({"type": "paragraph", "content": [{"type": "text", "text": p}]}))
        .collect();
    json!({"type": "doc", "version": 1, "content": paragraphs})
}

#[async_trait]
impl Notifier for JiraNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_jira",
            notifier_name = %self.base.name,
            group_key = %group.key()
        );

        async {
            let resolved = group.is_resolved();
            let label = dedup_label(&group.key_hash());
            let state = self.search(cancel, &label).await?;
            tracing::debug!(state = ?state, resolved = resolved, "JIRA issue lookup");

            match state {
                IssueState::NotFound if resolved => {
                    tracing::debug!("No JIRA issue for resolved group, nothing to do");
                    Ok(())
                }
                IssueState::NotFound => self.create(cancel, &self.content(group)).await,
                IssueState::FoundOpen { key } => {
                    self.update(cancel, &key, &self.content(group)).await?;
                    match &self.config.resolve_transition {
                        Some(name) if resolved => self.transition(cancel, &key, name).await,
                        _ => Ok(()),
                    }
                }
                IssueState::FoundDone { key, resolution } => {
                    self.update(cancel, &key, &self.content(group)).await?;
                    if resolved {
                        return Ok(());
                    }
                    if self.is_wont_fix(resolution.as_deref()) {
                        tracing::info!(issue = %key, "JIRA issue closed as won't fix, not reopening");
                        return Ok(());
                    }
                    match &self.config.reopen_transition {
                        Some(name) => self.transition(cancel, &key, name).await,
                        None => Ok(()),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for JiraNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraNotifier")
            .field("name", &self.base.name)
            .field("api_url", &self.config.api_url)
            .field("project", &self.config.project)
            .field("auth", &self.config.auth)
            .finish()
    }
}
