//! Kafka REST Proxy notifier.
//!
//! Two proxy API versions are supported:
//! - **v2**: `POST {proxy}/topics/{topic}` with a `records` envelope
//! - **v3**: `POST {proxy}/v3/clusters/{cluster_id}/topics/{topic}/records`
//!   with a typed `value` envelope; the proxy reports per-record failures in
//!   the response body's `error_code`, even on HTTP 200
//!
//! With basic auth the password comes from a [`PasswordSource`]. A failed
//! send re-reads the password once and tries again, so credentials rotated
//! on disk are picked up without a restart.

use crate::alert::{AlertGroup, AlertStatus};
use crate::config::{
    SecretResolver, SecretString, decode, require, validate_field_template, validate_http_url,
};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{Notifier, NotifierBase, NotifierDeps, send_checked, skip_resolved};
use crate::template::{DEFAULT_MESSAGE, DEFAULT_TITLE, truncate_bytes};
use crate::transport::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Kafka REST Proxy limit for the `description` field, in bytes.
const MAX_DESCRIPTION_BYTES: usize = 5000;

/// Sends after the first that follow a password refresh.
const PASSWORD_REFRESH_RETRIES: usize = 1;

const V2_CONTENT_TYPE: &str = "application/vnd.kafka.json.v2+json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KafkaApiVersion {
    #[default]
    V2,
    V3,
}

// =============================================================================
// Password source
// =============================================================================

/// Where the basic-auth password is read from.
#[async_trait]
pub trait PasswordSource: Send + Sync {
    async fn password(&self) -> std::io::Result<SecretString>;
}

/// A password fixed at configuration time.
pub struct StaticPassword(pub SecretString);

#[async_trait]
impl PasswordSource for StaticPassword {
    async fn password(&self) -> std::io::Result<SecretString> {
        Ok(self.0.clone())
    }
}

/// Reads the password from a file on every call. Surrounding whitespace is
/// trimmed.
#[derive(Debug, Clone)]
pub struct FilePasswordSource {
    path: PathBuf,
}

impl FilePasswordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PasswordSource for FilePasswordSource {
    async fn password(&self) -> std::io::Result<SecretString> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(SecretString::new(content.trim().to_string()))
    }
}

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    kafka_rest_proxy: String,
    #[serde(default)]
    kafka_topic: String,
    #[serde(default)]
    kafka_cluster_id: String,
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    password_file: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

#[derive(Clone)]
pub struct KafkaConfig {
    pub rest_proxy: String,
    pub topic: String,
    /// Required for v3.
    pub cluster_id: Option<String>,
    pub api_version: KafkaApiVersion,
    pub username: Option<String>,
    pub password: Option<Arc<dyn PasswordSource>>,
    pub description: Option<String>,
    pub details: Option<String>,
}

impl KafkaConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;

        let rest_proxy = require("kafkaRestProxy", &raw.kafka_rest_proxy)?
            .trim_end_matches('/')
            .to_string();
        validate_http_url("kafkaRestProxy", &rest_proxy)?;
        let topic = require("kafkaTopic", &raw.kafka_topic)?;

        let api_version = match raw.api_version.trim().to_lowercase().as_str() {
            "" | "v2" => KafkaApiVersion::V2,
            "v3" => KafkaApiVersion::V3,
            other => {
                return Err(SettingsError::invalid(
                    "apiVersion",
                    format!("unsupported version '{}', expected v2 or v3", other),
                ));
            }
        };
        let cluster_id = match raw.kafka_cluster_id.trim() {
            "" if api_version == KafkaApiVersion::V3 => {
                return Err(SettingsError::Missing("kafkaClusterId"));
            }
            "" => None,
            id => Some(id.to_string()),
        };

        let username = Some(raw.username.trim().to_string()).filter(|u| !u.is_empty());
        let password = secrets.get("password", &raw.password);
        let password: Option<Arc<dyn PasswordSource>> = match &username {
            None => None,
            Some(_) if !raw.password_file.trim().is_empty() => {
                if !password.trim().is_empty() {
                    return Err(SettingsError::Conflict(
                        "set either password or passwordFile, not both".to_string(),
                    ));
                }
                Some(Arc::new(FilePasswordSource::new(raw.password_file.trim())))
            }
            Some(_) => {
                let password = require("password", &password)?;
                Some(Arc::new(StaticPassword(SecretString::new(password))))
            }
        };

        if let Some(description) = &raw.description {
            validate_field_template("description", description)?;
        }
        if let Some(details) = &raw.details {
            validate_field_template("details", details)?;
        }

        Ok(Self {
            rest_proxy,
            topic,
            cluster_id,
            api_version,
            username,
            password,
            description: raw.description,
            details: raw.details,
        })
    }

    /// Replaces the password source, keeping the username.
    pub fn with_password_source(mut self, source: Arc<dyn PasswordSource>) -> Self {
        self.password = Some(source);
        self
    }

    fn records_url(&self) -> String {
        match (self.api_version, &self.cluster_id) {
            (KafkaApiVersion::V3, Some(cluster_id)) => format!(
                "{}/v3/clusters/{}/topics/{}/records",
                self.rest_proxy,
                urlencoding::encode(cluster_id),
                urlencoding::encode(&self.topic)
            ),
            _ => format!("{}/topics/{}", self.rest_proxy, urlencoding::encode(&self.topic)),
        }
    }
}

impl std::fmt::Debug for KafkaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaConfig")
            .field("rest_proxy", &self.rest_proxy)
            .field("topic", &self.topic)
            .field("cluster_id", &self.cluster_id)
            .field("api_version", &self.api_version)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// =============================================================================
// Payload
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct KafkaRecord {
    pub alert_state: &'static str,
    pub client: &'static str,
    pub client_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<KafkaContext>,
    pub description: String,
    pub details: String,
    pub incident_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KafkaContext {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub src: String,
}

#[derive(Serialize)]
struct V2Body<'a> {
    records: [V2Record<'a>; 1],
}

#[derive(Serialize)]
struct V2Record<'a> {
    value: &'a KafkaRecord,
}

#[derive(Serialize)]
struct V3Body<'a> {
    value: V3Value<'a>,
}

#[derive(Serialize)]
struct V3Value<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a KafkaRecord,
}

#[derive(Debug, Deserialize)]
struct V3Response {
    #[serde(default)]
    error_code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

// =============================================================================
// Notifier
// =============================================================================

pub struct KafkaNotifier {
    base: NotifierBase,
    config: KafkaConfig,
    deps: NotifierDeps,
    /// Last password read from the source.
    password: Mutex<Option<SecretString>>,
}

impl KafkaNotifier {
    pub fn new(base: NotifierBase, config: KafkaConfig, deps: NotifierDeps) -> Self {
        Self {
            base,
            config,
            deps,
            password: Mutex::new(None),
        }
    }

    async fn build_record(&self, cancel: &CancellationToken, group: &AlertGroup) -> KafkaRecord {
        let ctx = self
            .deps
            .render_context_with_images(cancel, &self.base, group)
            .await;
        let mut tmpl = self.deps.templates.renderer(&ctx);
        let description = tmpl.render_or_default(self.config.description.as_deref(), DEFAULT_TITLE);
        let details = tmpl.render_or_default(self.config.details.as_deref(), DEFAULT_MESSAGE);
        tmpl.warn_on_error(&self.base.name, self.notifier_type());

        let (description, cut) = truncate_bytes(&description, MAX_DESCRIPTION_BYTES);
        if cut {
            tracing::warn!(
                notifier_name = %self.base.name,
                field = "description",
                max_bytes = MAX_DESCRIPTION_BYTES,
                "Truncated field to vendor limit"
            );
        }

        KafkaRecord {
            alert_state: match ctx.status {
                AlertStatus::Firing => "alerting",
                AlertStatus::Resolved => "ok",
            },
            client: "Herald",
            client_url: ctx.external_url.clone(),
            contexts: ctx
                .alerts
                .iter()
                .filter_map(|a| a.image_url.clone())
                .map(|src| KafkaContext { kind: "image", src })
                .collect(),
            description,
            details,
            incident_key: ctx.group_key_hash.clone(),
        }
    }

    fn request(
        &self,
        record: &KafkaRecord,
        password: Option<SecretString>,
    ) -> Result<HttpRequest, NotifyError> {
        let url = self.config.records_url();
        let request = match self.config.api_version {
            KafkaApiVersion::V2 => {
                let body = serde_json::to_vec(&V2Body {
                    records: [V2Record { value: record }],
                })
                .map_err(|e| NotifyError::Permanent(format!("failed to encode record: {}", e)))?;
                HttpRequest::post(url)
                    .body(body, V2_CONTENT_TYPE)
                    .header("Accept", V2_CONTENT_TYPE)
            }
            KafkaApiVersion::V3 => HttpRequest::post(url).json(&V3Body {
                value: V3Value {
                    kind: "JSON",
                    data: record,
                },
            })?,
        };
        Ok(match (&self.config.username, password) {
            (Some(username), Some(password)) => request.basic_auth(username.as_str(), password),
            _ => request,
        })
    }

    async fn send_once(
        &self,
        cancel: &CancellationToken,
        request: HttpRequest,
    ) -> Result<(), NotifyError> {
        let response = send_checked(self.deps.http.as_ref(), cancel, "kafka", request).await?;
        if self.config.api_version == KafkaApiVersion::V3 {
            check_v3_body(&response)?;
        }
        Ok(())
    }

    /// Cached password, loading it on first use.
    async fn current_password(&self) -> Result<Option<SecretString>, NotifyError> {
        let Some(source) = &self.config.password else {
            return Ok(None);
        };
        let mut cached = self.password.lock().await;
        if let Some(password) = cached.as_ref() {
            return Ok(Some(password.clone()));
        }
        let password = source.password().await.map_err(|e| {
            NotifyError::Retryable(format!("failed to read kafka password: {}", e))
        })?;
        *cached = Some(password.clone());
        Ok(Some(password))
    }

    /// Re-reads the password from its source and caches it.
    async fn refresh_password(&self) -> Result<Option<SecretString>, NotifyError> {
        let Some(source) = &self.config.password else {
            return Ok(None);
        };
        let password = source.password().await.map_err(|e| {
            NotifyError::Retryable(format!("failed to re-read kafka password: {}", e))
        })?;
        *self.password.lock().await = Some(password.clone());
        Ok(Some(password))
    }
}

/// v3 reports record failures in the body. Only a missing code or a numeric
/// code in 200..=299 counts as accepted.
fn check_v3_body(response: &HttpResponse) -> Result<(), NotifyError> {
    let body: V3Response = match response.json() {
        Ok(body) => body,
        // A 2xx without a parseable body is taken as accepted.
        Err(_) => return Ok(()),
    };
    let code = match body.error_code {
        None | Some(serde_json::Value::Null) => return Ok(()),
        Some(code) => code,
    };
    if code.as_i64().is_some_and(|c| (200..300).contains(&c)) {
        return Ok(());
    }
    Err(NotifyError::Retryable(format!(
        "kafka rejected record with error_code {}: {}",
        code,
        body.message.unwrap_or_default()
    )))
}

#[async_trait]
impl Notifier for KafkaNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_kafka",
            notifier_name = %self.base.name,
            group_key = %group.key(),
            topic = %self.config.topic
        );

        async {
            let record = self.build_record(cancel, group).await;

            if self.config.password.is_none() {
                let request = self.request(&record, None)?;
                self.send_once(cancel, request).await?;
                tracing::debug!("Kafka record produced");
                return Ok(());
            }

            let mut last_error = None;
            for attempt in 0..=PASSWORD_REFRESH_RETRIES {
                let password = if attempt == 0 {
                    self.current_password().await?
                } else {
                    match self.refresh_password().await {
                        Ok(password) => password,
                        Err(e) => {
                            tracing::warn!(error = %e, "Kafka password refresh failed");
                            break;
                        }
                    }
                };
                let request = self.request(&record, password)?;
                match self.send_once(cancel, request).await {
                    Ok(()) => {
                        tracing::debug!(attempt = attempt, "Kafka record produced");
                        return Ok(());
                    }
                    Err(NotifyError::Cancelled) => return Err(NotifyError::Cancelled),
                    Err(e) => {
                        if attempt < PASSWORD_REFRESH_RETRIES {
                            tracing::warn!(
                                error = %e,
                                "Kafka send failed, refreshing password and retrying once"
                            );
                        }
                        last_error = Some(e);
                    }
                }
            }
            Err(last_error
                .unwrap_or_else(|| NotifyError::Retryable("kafka send failed".to_string())))
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReceiverKind, SecureSettings};
    use crate::notify::testing::{self, RecordingHttp, ok, status};
    use crate::transport::HttpAuth;
    use serde_json::json;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn notifier(settings: serde_json::Value, http: Arc<RecordingHttp>) -> KafkaNotifier {
        let secrets = SecureSettings::from_pairs([("password", "pw-1")]);
        let config = KafkaConfig::from_settings(&settings, &secrets).unwrap();
        KafkaNotifier::new(testing::base(ReceiverKind::Kafka), config, testing::deps(http))
    }

    fn basic_password(request: &HttpRequest) -> String {
        match &request.auth {
            HttpAuth::Basic { password, .. } => password.expose().to_string(),
            other => panic!("expected basic auth, got {:?}", other),
        }
    }

    /// Counts reads and returns passwords from a list, repeating the last.
    struct CountingSource {
        passwords: Vec<&'static str>,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl PasswordSource for CountingSource {
        async fn password(&self) -> std::io::Result<SecretString> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            let pw = self.passwords[n.min(self.passwords.len() - 1)];
            Ok(SecretString::from(pw))
        }
    }

    #[test]
    fn settings_validation() {
        let secrets = SecureSettings::default();
        let err = KafkaConfig::from_settings(&json!({}), &secrets).unwrap_err();
        assert!(matches!(err, SettingsError::Missing("kafkaRestProxy")));

        let err = KafkaConfig::from_settings(
            &json!({"kafkaRestProxy": "http://proxy:8082", "kafkaTopic": "alerts", "apiVersion": "v3"}),
            &secrets,
        )
        .unwrap_err();
        assert!(matches!(err, SettingsError::Missing("kafkaClusterId")));

        let err = KafkaConfig::from_settings(
            &json!({"kafkaRestProxy": "http://proxy:8082", "kafkaTopic": "alerts", "apiVersion": "v4"}),
            &secrets,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unsupported version 'v4'"));

        let err = KafkaConfig::from_settings(
            &json!({"kafkaRestProxy": "http://proxy:8082", "kafkaTopic": "alerts", "username": "u"}),
            &secrets,
        )
        .unwrap_err();
        assert!(matches!(err, SettingsError::Missing("password")));
    }

    #[tokio::test]
    async fn v2_posts_records_envelope() {
        let http = RecordingHttp::new();
        let n = notifier(
            json!({"kafkaRestProxy": "http://proxy:8082/", "kafkaTopic": "alerts"}),
            http.clone(),
        );
        let group = testing::firing_group();
        n.notify(&CancellationToken::new(), &group).await.unwrap();

        let req = http.single();
        assert_eq!(req.url, "http://proxy:8082/topics/alerts");
        assert_eq!(req.header_value("Content-Type"), Some(V2_CONTENT_TYPE));
        assert_eq!(req.auth, HttpAuth::None);
        let value = &req.body_json()["records"][0]["value"];
        assert_eq!(value["alert_state"], "alerting");
        assert_eq!(value["incident_key"], group.key_hash());
        assert_eq!(value["description"], "[FIRING:1] HighCPU eu-1");
        assert_eq!(value["client_url"], "https://grafana.example.com");
    }

    #[tokio::test]
    async fn v3_posts_typed_value_to_cluster_topic() {
        let http = RecordingHttp::with_responses(vec![ok(r#"{"error_code":200,"topic_name":"alerts"}"#)]);
        let n = notifier(
            json!({
                "kafkaRestProxy": "http://proxy:8082",
                "kafkaTopic": "alerts",
                "apiVersion": "v3",
                "kafkaClusterId": "lkc-1"
            }),
            http.clone(),
        );
        n.notify(&CancellationToken::new(), &testing::resolved_group())
            .await
            .unwrap();

        let req = http.single();
        assert_eq!(req.url, "http://proxy:8082/v3/clusters/lkc-1/topics/alerts/records");
        let body = req.body_json();
        assert_eq!(body["value"]["type"], "JSON");
        assert_eq!(body["value"]["data"]["alert_state"], "ok");
    }

    #[tokio::test]
    async fn v3_embedded_error_code_fails() {
        let http = RecordingHttp::with_responses(vec![ok(
            r#"{"error_code":40403,"message":"Topic not found."}"#,
        )]);
        let n = notifier(
            json!({
                "kafkaRestProxy": "http://proxy:8082",
                "kafkaTopic": "alerts",
                "apiVersion": "v3",
                "kafkaClusterId": "lkc-1"
            }),
            http,
        );
        let err = n
            .notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("40403"));
    }

    #[test]
    fn v3_error_code_outside_2xx_fails_whatever_its_type() {
        for body in [
            r#"{"error_code":"40403","message":"Topic not found."}"#,
            r#"{"error_code":-1}"#,
            r#"{"error_code":70000}"#,
            r#"{"error_code":200.5}"#,
            r#"{"error_code":{"code":200}}"#,
        ] {
            let err = check_v3_body(&HttpResponse::new(200, body)).unwrap_err();
            assert!(err.is_retryable(), "{}", body);
        }
        for body in [r#"{"error_code":200}"#, r#"{"error_code":null}"#, "{}", "accepted"] {
            assert!(check_v3_body(&HttpResponse::new(200, body)).is_ok(), "{}", body);
        }
    }

    #[tokio::test]
    async fn description_is_limited_in_bytes() {
        let http = RecordingHttp::new();
        let n = notifier(
            json!({
                "kafkaRestProxy": "http://proxy:8082",
                "kafkaTopic": "alerts",
                "description": "{% for i in range(3000) %}é{% endfor %}"
            }),
            http.clone(),
        );
        n.notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap();
        let body = http.single().body_json();
        let description = body["records"][0]["value"]["description"].as_str().unwrap().to_string();
        assert!(description.len() <= MAX_DESCRIPTION_BYTES);
        assert!(description.ends_with('…'));
    }

    #[tokio::test]
    async fn auth_failure_retries_once_with_refreshed_password() {
        let http = RecordingHttp::with_responses(vec![status(401, "unauthorized"), ok("{}")]);
        let source = Arc::new(CountingSource {
            passwords: vec!["old", "new"],
            reads: AtomicUsize::new(0),
        });
        let secrets = SecureSettings::from_pairs([("password", "unused")]);
        let config = KafkaConfig::from_settings(
            &json!({"kafkaRestProxy": "http://proxy:8082", "kafkaTopic": "alerts", "username": "svc"}),
            &secrets,
        )
        .unwrap()
        .with_password_source(source.clone());
        let n = KafkaNotifier::new(testing::base(ReceiverKind::Kafka), config, testing::deps(http.clone()));

        n.notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap();

        let requests = http.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(basic_password(&requests[0]), "old");
        assert_eq!(basic_password(&requests[1]), "new");
        // One initial load plus exactly one refresh.
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_failure_is_terminal() {
        let http = RecordingHttp::with_responses(vec![
            status(401, "unauthorized"),
            status(401, "still unauthorized"),
            ok("{}"),
        ]);
        let n = notifier(
            json!({"kafkaRestProxy": "http://proxy:8082", "kafkaTopic": "alerts", "username": "svc"}),
            http.clone(),
        );
        let err = n
            .notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("still unauthorized"));
        assert_eq!(http.count(), 2);
    }

    #[tokio::test]
    async fn no_retry_without_basic_auth() {
        let http = RecordingHttp::with_responses(vec![status(503, "down"), ok("{}")]);
        let n = notifier(
            json!({"kafkaRestProxy": "http://proxy:8082", "kafkaTopic": "alerts"}),
            http.clone(),
        );
        let err = n
            .notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(http.count(), 1);
    }

    #[tokio::test]
    async fn rotated_password_file_is_picked_up() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "first-secret").unwrap();

        let http = RecordingHttp::new();
        let config = KafkaConfig::from_settings(
            &json!({
                "kafkaRestProxy": "http://proxy:8082",
                "kafkaTopic": "alerts",
                "username": "svc",
                "passwordFile": file.path().to_str().unwrap()
            }),
            &SecureSettings::default(),
        )
        .unwrap();
        let n = KafkaNotifier::new(testing::base(ReceiverKind::Kafka), config, testing::deps(http.clone()));
        let cancel = CancellationToken::new();
        let group = testing::firing_group();

        n.notify(&cancel, &group).await.unwrap();
        assert_eq!(basic_password(&http.single()), "first-secret");

        std::fs::write(file.path(), "second-secret\n").unwrap();
        http.push(status(401, "unauthorized"));
        n.notify(&cancel, &group).await.unwrap();

        let requests = http.requests();
        assert_eq!(requests.len(), 3);
        // The cached password is tried first, then the file is re-read.
        assert_eq!(basic_password(&requests[1]), "first-secret");
        assert_eq!(basic_password(&requests[2]), "second-secret");
    }

    #[test]
    fn debug_hides_password() {
        let secrets = SecureSettings::from_pairs([("password", "pw-1")]);
        let config = KafkaConfig::from_settings(
            &json!({"kafkaRestProxy": "http://proxy:8082", "kafkaTopic": "alerts", "username": "svc"}),
            &secrets,
        )
        .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("pw-1"));
        assert!(debug.contains("[REDACTED]"));
    }
}
