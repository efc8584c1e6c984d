//! WeCom (WeChat Work) notifier.
//!
//! Two modes:
//! - **webhook**: post to a group robot URL
//! - **app**: send through an application with `corp_id`/`secret`, which
//!   needs an access token from the `gettoken` endpoint
//!
//! In app mode the access token is cached per notifier. Refresh is
//! single-flight: the cache mutex is held while the token is fetched, so
//! concurrent notifications wait for that one fetch and reuse its result.

use crate::alert::AlertGroup;
use crate::config::{
    SecretResolver, SecretString, decode, require, validate_field_template, validate_http_url,
};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{Notifier, NotifierBase, NotifierDeps, send_checked, skip_resolved};
use crate::template::{DEFAULT_MESSAGE, DEFAULT_TITLE};
use crate::transport::HttpRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub const WECOM_API_URL: &str = "https://qyapi.weixin.qq.com/cgi-bin";

/// Tokens are refreshed this long before WeCom says they expire.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Error codes meaning the access token is no longer accepted.
const TOKEN_INVALID_CODES: &[i64] = &[40014, 42001];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    url: String,
    #[serde(default)]
    endpoint_url: String,
    #[serde(default, rename = "corp_id")]
    corp_id: String,
    #[serde(default)]
    secret: String,
    #[serde(default, rename = "agent_id")]
    agent_id: String,
    #[serde(default, rename = "touser")]
    to_user: String,
    #[serde(default)]
    msgtype: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeComMsgType {
    Markdown,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeComMode {
    Webhook {
        url: SecretString,
    },
    App {
        api_url: String,
        corp_id: String,
        secret: SecretString,
        agent_id: String,
        to_user: String,
    },
}

#[derive(Debug, Clone)]
pub struct WeComConfig {
    pub mode: WeComMode,
    pub msg_type: WeComMsgType,
    pub title: Option<String>,
    pub message: Option<String>,
}

impl WeComConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;

        let url = secrets.get("url", &raw.url).trim().to_string();
        let mode = if !url.is_empty() {
            validate_http_url("url", &url)?;
            WeComMode::Webhook {
                url: SecretString::new(url),
            }
        } else {
            let secret = secrets.get("secret", &raw.secret);
            if raw.corp_id.trim().is_empty() && secret.trim().is_empty() {
                return Err(SettingsError::Conflict(
                    "either url or corp_id and secret must be set".to_string(),
                ));
            }
            let api_url = match raw.endpoint_url.trim() {
                "" => WECOM_API_URL.to_string(),
                other => other.trim_end_matches('/').to_string(),
            };
            validate_http_url("endpointUrl", &api_url)?;
            WeComMode::App {
                api_url,
                corp_id: require("corp_id", &raw.corp_id)?,
                secret: SecretString::new(require("secret", &secret)?),
                agent_id: require("agent_id", &raw.agent_id)?,
                to_user: match raw.to_user.trim() {
                    "" => "@all".to_string(),
                    user => user.to_string(),
                },
            }
        };

        let msg_type = match raw.msgtype.trim() {
            "" | "markdown" => WeComMsgType::Markdown,
            "text" => WeComMsgType::Text,
            other => {
                return Err(SettingsError::invalid(
                    "msgtype",
                    format!("expected 'markdown' or 'text', got '{}'", other),
                ));
            }
        };

        if let Some(title) = &raw.title {
            validate_field_template("title", title)?;
        }
        if let Some(message) = &raw.message {
            validate_field_template("message", message)?;
        }

        Ok(Self {
            mode,
            msg_type,
            title: raw.title,
            message: raw.message,
        })
    }
}

#[derive(Debug, Serialize)]
struct Content {
    content: String,
}

#[derive(Debug, Serialize)]
struct WeComMessage<'a> {
    msgtype: WeComMsgType,
    #[serde(skip_serializing_if = "Option::is_none")]
    agentid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    touser: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    markdown: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

impl ApiResponse {
    fn check(&self, call: &str) -> Result<(), NotifyError> {
        if self.errcode == 0 {
            return Ok(());
        }
        Err(NotifyError::Retryable(format!(
            "wecom {} returned errcode {}: {}",
            call, self.errcode, self.errmsg
        )))
    }
}

#[derive(Clone)]
struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

pub struct WeComNotifier {
    base: NotifierBase,
    config: WeComConfig,
    deps: NotifierDeps,
    token: Mutex<Option<CachedToken>>,
}

impl WeComNotifier {
    pub fn new(base: NotifierBase, config: WeComConfig, deps: NotifierDeps) -> Self {
        Self {
            base,
            config,
            deps,
            token: Mutex::new(None),
        }
    }

    /// Returns a valid access token, fetching a new one when the cached token
    /// is missing or about to expire.
    async fn access_token(
        &self,
        cancel: &CancellationToken,
        api_url: &str,
        corp_id: &str,
        secret: &SecretString,
    ) -> Result<SecretString, NotifyError> {
        let mut cached = self.token.lock().await;
        let now = self.deps.clock.now();
        if let Some(token) = cached.as_ref()
            && now < token.expires_at
        {
            return Ok(token.token.clone());
        }

        let url = format!(
            "{}/gettoken?corpid={}&corpsecret={}",
            api_url,
            urlencoding::encode(corp_id),
            urlencoding::encode(secret.expose())
        );
        let response =
            send_checked(self.deps.http.as_ref(), cancel, "wecom", HttpRequest::get(url)).await?;
        let body: ApiResponse = response.json().map_err(|e| {
            NotifyError::Retryable(format!("wecom gettoken returned invalid JSON: {}", e))
        })?;
        body.check("gettoken")?;
        if body.access_token.is_empty() {
            return Err(NotifyError::Retryable(
                "wecom gettoken returned no access token".to_string(),
            ));
        }

        let expires_at = token_expiry(now, body.expires_in).ok_or_else(|| {
            NotifyError::Retryable(format!(
                "wecom gettoken returned invalid expires_in {}",
                body.expires_in
            ))
        })?;
        let token = SecretString::new(body.access_token);
        tracing::debug!(expires_in = body.expires_in, "Fetched WeCom access token");
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    fn content(&self, title: &str, message: &str) -> Content {
        let content = match self.config.msg_type {
            WeComMsgType::Markdown => format!("## {}\n\n{}", title, message),
            WeComMsgType::Text => format!("{}\n{}", title, message),
        };
        Content { content }
    }
}

/// Instant after which a token issued at `now` is no longer reused, or `None`
/// when `expires_in` is out of range.
fn token_expiry(now: DateTime<Utc>, expires_in: i64) -> Option<DateTime<Utc>> {
    let secs = expires_in.checked_sub(TOKEN_EXPIRY_MARGIN_SECS)?;
    now.checked_add_signed(chrono::TimeDelta::try_seconds(secs)?)
}

#[async_trait]
impl Notifier for WeComNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_wecom",
            notifier_name = %self.base.name,
            group_key = %group.key()
        );

        async {
            let ctx = self.deps.render_context(&self.base, group);
            let mut tmpl = self.deps.templates.renderer(&ctx);
            let title = tmpl.render_or_default(self.config.title.as_deref(), DEFAULT_TITLE);
            let message = tmpl.render_or_default(self.config.message.as_deref(), DEFAULT_MESSAGE);
            tmpl.warn_on_error(&self.base.name, self.notifier_type());

            let content = self.content(&title, &message);
            let (markdown, text) = match self.config.msg_type {
                WeComMsgType::Markdown => (Some(content), None),
                WeComMsgType::Text => (None, Some(content)),
            };

            let request = match &self.config.mode {
                WeComMode::Webhook { url } => HttpRequest::post(url.expose()).json(&WeComMessage {
                    msgtype: self.config.msg_type,
                    agentid: None,
                    touser: None,
                    markdown,
                    text,
                })?,
                WeComMode::App {
                    api_url,
                    corp_id,
                    secret,
                    agent_id,
                    to_user,
                } => {
                    let token = self.access_token(cancel, api_url, corp_id, secret).await?;
                    let url = format!(
                        "{}/message/send?access_token={}",
                        api_url,
                        urlencoding::encode(token.expose())
                    );
                    HttpRequest::post(url).json(&WeComMessage {
                        msgtype: self.config.msg_type,
                        agentid: Some(agent_id.as_str()),
                        touser: Some(to_user.as_str()),
                        markdown,
                        text,
                    })?
                }
            };

            let response = send_checked(self.deps.http.as_ref(), cancel, "wecom", request).await?;
            let body: ApiResponse = response.json().map_err(|e| {
                NotifyError::Retryable(format!("wecom returned invalid JSON: {}", e))
            })?;
            if TOKEN_INVALID_CODES.contains(&body.errcode) {
                self.invalidate_token().await;
            }
            body.check("send")?;
            tracing::debug!("WeCom notification sent");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for WeComNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.config.mode {
            WeComMode::Webhook { .. } => "webhook",
            WeComMode::App { .. } => "app",
        };
        f.debug_struct("WeComNotifier")
            .field("name", &self.base.name)
            .field("mode", &mode)
            .field("msg_type", &self.config.msg_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReceiverKind, SecureSettings};
    use crate::notify::testing::{self, FixedClock, RecordingHttp, ok};
    use crate::transport::Method;
    use futures_util::future::join_all;
    use serde_json::json;
    use std::time::Duration;

    const TOKEN_OK: &str = r#"{"errcode": 0, "errmsg": "ok", "access_token": "tok-1", "expires_in": 7200}"#;

    fn app_config() -> WeComConfig {
        let secrets = SecureSettings::from_pairs([("secret", "app-secret")]);
        WeComConfig::from_settings(&json!({"corp_id": "corp1", "agent_id": "1000002"}), &secrets)
            .unwrap()
    }

    fn token_fetches(http: &RecordingHttp) -> usize {
        http.requests()
            .iter()
            .filter(|r| r.url.contains("/gettoken"))
            .count()
    }

    #[test]
    fn settings_need_webhook_or_app_credentials() {
        let err = WeComConfig::from_settings(&json!({}), &SecureSettings::default()).unwrap_err();
        assert!(matches!(err, SettingsError::Conflict(_)));

        let secrets = SecureSettings::from_pairs([("secret", "s")]);
        let err = WeComConfig::from_settings(&json!({"corp_id": "c"}), &secrets).unwrap_err();
        assert!(matches!(err, SettingsError::Missing("agent_id")));
    }

    #[test]
    fn app_mode_defaults_to_everyone() {
        match app_config().mode {
            WeComMode::App { to_user, api_url, .. } => {
                assert_eq!(to_user, "@all");
                assert_eq!(api_url, WECOM_API_URL);
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[tokio::test]
    async fn webhook_mode_posts_markdown() {
        let http = RecordingHttp::with_responses(vec![ok(r#"{"errcode": 0, "errmsg": "ok"}"#)]);
        let config = WeComConfig::from_settings(
            &json!({"url": "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=k"}),
            &SecureSettings::default(),
        )
        .unwrap();
        let n = WeComNotifier::new(testing::base(ReceiverKind::WeCom), config, testing::deps(http.clone()));
        n.notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap();

        let body = http.single().body_json();
        assert_eq!(body["msgtype"], "markdown");
        assert!(
            body["markdown"]["content"]
                .as_str()
                .unwrap()
                .starts_with("## [FIRING:1] HighCPU eu-1")
        );
        assert!(body.get("agentid").is_none());
    }

    #[tokio::test]
    async fn nonzero_errcode_is_an_error() {
        let http = RecordingHttp::with_responses(vec![ok(r#"{"errcode": 93000, "errmsg": "invalid webhook url"}"#)]);
        let config = WeComConfig::from_settings(
            &json!({"url": "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=k"}),
            &SecureSettings::default(),
        )
        .unwrap();
        let n = WeComNotifier::new(testing::base(ReceiverKind::WeCom), config, testing::deps(http));
        let err = n
            .notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("93000"));
    }

    #[tokio::test]
    async fn app_mode_fetches_token_then_sends() {
        let http = RecordingHttp::with_responses(vec![ok(TOKEN_OK)]);
        let n = WeComNotifier::new(testing::base(ReceiverKind::WeCom), app_config(), testing::deps(http.clone()));
        n.notify(&CancellationToken::new(), &testing::firing_group())
            .await
            .unwrap();

        let requests = http.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(
            requests[0].url,
            "https://qyapi.weixin.qq.com/cgi-bin/gettoken?corpid=corp1&corpsecret=app-secret"
        );
        assert_eq!(
            requests[1].url,
            "https://qyapi.weixin.qq.com/cgi-bin/message/send?access_token=tok-1"
        );
        let body = requests[1].body_json();
        assert_eq!(body["agentid"], "1000002");
        assert_eq!(body["touser"], "@all");
    }

    #[tokio::test]
    async fn concurrent_notifications_share_one_token_fetch() {
        let http = RecordingHttp::delayed(Duration::from_millis(20));
        http.push(ok(TOKEN_OK));
        let n = WeComNotifier::new(testing::base(ReceiverKind::WeCom), app_config(), testing::deps(http.clone()));
        let group = testing::firing_group();
        let cancel = CancellationToken::new();

        let results = join_all((0..8).map(|_| n.notify(&cancel, &group))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(token_fetches(&http), 1);
        assert_eq!(http.count(), 9);
    }

    #[tokio::test]
    async fn token_is_refetched_after_expiry() {
        let http = RecordingHttp::with_responses(vec![ok(TOKEN_OK)]);
        let clock = FixedClock::at(testing::t0());
        let mut deps = testing::deps(http.clone());
        deps.clock = clock.clone();
        let n = WeComNotifier::new(testing::base(ReceiverKind::WeCom), app_config(), deps);
        let group = testing::firing_group();
        let cancel = CancellationToken::new();

        n.notify(&cancel, &group).await.unwrap();
        clock.advance(chrono::Duration::seconds(7000));
        n.notify(&cancel, &group).await.unwrap();
        assert_eq!(token_fetches(&http), 1);

        http.push(ok(TOKEN_OK));
        clock.advance(chrono::Duration::seconds(200));
        n.notify(&cancel, &group).await.unwrap();
        assert_eq!(token_fetches(&http), 2);
    }

    #[tokio::test]
    async fn out_of_range_expires_in_is_retryable() {
        for expires_in in [i64::MAX, i64::MIN, i64::MAX / 1000] {
            let body = format!(
                r#"{{"errcode": 0, "access_token": "tok-1", "expires_in": {}}}"#,
                expires_in
            );
            let http = RecordingHttp::with_responses(vec![ok(&body)]);
            let n = WeComNotifier::new(testing::base(ReceiverKind::WeCom), app_config(), testing::deps(http.clone()));
            let err = n
                .notify(&CancellationToken::new(), &testing::firing_group())
                .await
                .unwrap_err();
            assert!(err.is_retryable(), "{}", expires_in);
            assert!(err.to_string().contains("expires_in"));
            assert_eq!(http.count(), 1);
        }
    }

    #[test]
    fn token_expiry_keeps_the_margin() {
        let now = testing::t0();
        assert_eq!(
            token_expiry(now, 7200),
            Some(now + chrono::Duration::seconds(7200 - TOKEN_EXPIRY_MARGIN_SECS))
        );
        assert!(token_expiry(now, i64::MIN).is_none());
    }

    #[tokio::test]
    async fn rejected_token_is_dropped_from_cache() {
        let http = RecordingHttp::with_responses(vec![
            ok(TOKEN_OK),
            ok(r#"{"errcode": 42001, "errmsg": "access_token expired"}"#),
            ok(TOKEN_OK),
        ]);
        let n = WeComNotifier::new(testing::base(ReceiverKind::WeCom), app_config(), testing::deps(http.clone()));
        let group = testing::firing_group();
        let cancel = CancellationToken::new();

        assert!(n.notify(&cancel, &group).await.unwrap_err().is_retryable());
        n.notify(&cancel, &group).await.unwrap();
        assert_eq!(token_fetches(&http), 2);
    }

    #[test]
    fn debug_output_hides_secret() {
        let n = WeComNotifier::new(
            testing::base(ReceiverKind::WeCom),
            app_config(),
            testing::deps(RecordingHttp::new()),
        );
        assert!(!format!("{:?}", n).contains("app-secret"));
    }
}
