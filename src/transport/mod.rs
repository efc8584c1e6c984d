//! Outbound transports.
//!
//! Notifiers never talk to the network directly: they build fully-formed
//! requests and hand them to one of the transport traits below. Production
//! code uses the `reqwest`, `lettre` and `rumqttc` backed implementations;
//! tests substitute recording fakes.
//!
//! Every call takes the caller's [`CancellationToken`] and returns
//! [`TransportError::Cancelled`] once it fires.

mod email;
mod http;
mod mqtt;

pub use email::SmtpEmailTransport;
pub use http::ReqwestTransport;
pub use mqtt::RumqttConnector;

use crate::config::SecretString;
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use tokio_util::sync::CancellationToken;

// =============================================================================
// HTTP
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request authentication.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum HttpAuth {
    #[default]
    None,
    Basic {
        username: String,
        password: SecretString,
    },
    Bearer(SecretString),
}

impl fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpAuth::None => f.write_str("None"),
            HttpAuth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            HttpAuth::Bearer(_) => f.write_str("Bearer([REDACTED])"),
        }
    }
}

/// A fully-formed HTTP request.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub auth: HttpAuth,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            auth: HttpAuth::None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::Put, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a JSON body and the matching content type.
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, TransportError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| TransportError::InvalidRequest(format!("JSON serialization error: {}", e)))?;
        Ok(self.body(bytes, "application/json"))
    }

    /// Sets an `application/x-www-form-urlencoded` body.
    pub fn form(self, fields: &[(&str, &str)]) -> Self {
        let encoded = fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.body(encoded, "application/x-www-form-urlencoded")
    }

    pub fn body(mut self, body: impl Into<Bytes>, content_type: &str) -> Self {
        self.headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
        self.headers
            .push(("Content-Type".to_string(), content_type.to_string()));
        self.body = body.into();
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.auth = HttpAuth::Basic {
            username: username.into(),
            password,
        };
        self
    }

    pub fn bearer_auth(mut self, token: SecretString) -> Self {
        self.auth = HttpAuth::Bearer(token);
        self
    }

    /// First header with the given name (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body parsed as JSON, `Null` when it is not valid JSON.
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Debug for HttpRequest {
    // URLs and bodies may carry credentials (webhook tokens, bot tokens).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &"[REDACTED]")
            .field("headers", &header_names)
            .field("body_len", &self.body.len())
            .field("auth", &self.auth)
            .finish()
    }
}

/// Raw response: any status is returned, interpretation is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends `request` and returns the response whatever its status.
    async fn send_http(
        &self,
        cancel: &CancellationToken,
        request: HttpRequest,
    ) -> Result<HttpResponse, TransportError>;
}

// =============================================================================
// Email
// =============================================================================

/// One email, possibly addressed to several recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_email(
        &self,
        cancel: &CancellationToken,
        message: EmailMessage,
    ) -> Result<(), TransportError>;
}

// =============================================================================
// MQTT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<i64> for QoS {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {}", other)),
        }
    }
}

/// TLS material for an MQTT connection. Certificates and key are PEM text.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MqttTlsConfig {
    pub ca_cert: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<SecretString>,
    pub insecure_skip_verify: bool,
}

impl fmt::Debug for MqttTlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttTlsConfig")
            .field("ca_cert", &self.ca_cert.is_some())
            .field("client_cert", &self.client_cert.is_some())
            .field("client_key", &self.client_key)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

/// Everything needed to open one broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConnectOptions {
    /// `tcp://host:port`, `ssl://host:port` (or `mqtt://` / `mqtts://`).
    pub broker_url: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// TLS settings; also forces TLS on a `tcp://` URL.
    pub tls: Option<MqttTlsConfig>,
}

#[async_trait]
pub trait MqttConnector: Send + Sync {
    /// Opens a session. TLS and connection failures are returned as
    /// [`TransportError::Tls`] / [`TransportError::Rejected`] so callers can
    /// treat them as permanent.
    async fn connect(
        &self,
        cancel: &CancellationToken,
        options: &MqttConnectOptions,
    ) -> Result<Box<dyn MqttSession>, TransportError>;
}

#[async_trait]
pub trait MqttSession: Send {
    async fn publish(
        &mut self,
        cancel: &CancellationToken,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    ) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_sets_body_and_content_type() {
        let req = HttpRequest::post("https://example.com")
            .json(&serde_json::json!({"a": 1}))
            .unwrap();
        assert_eq!(req.header_value("content-type"), Some("application/json"));
        assert_eq!(req.body_json()["a"], 1);
    }

    #[test]
    fn body_replaces_previous_content_type() {
        let req = HttpRequest::post("https://example.com")
            .form(&[("message", "a b&c")])
            .body("x", "text/plain");
        let types: Vec<_> = req
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("content-type"))
            .collect();
        assert_eq!(types.len(), 1);
        assert_eq!(req.header_value("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn form_encodes_values() {
        let req = HttpRequest::post("https://example.com").form(&[("message", "a b&c"), ("k", "é")]);
        assert_eq!(&req.body[..], b"message=a%20b%26c&k=%C3%A9");
    }

    #[test]
    fn debug_output_hides_url_and_credentials() {
        let req = HttpRequest::post("https://hooks.slack.com/services/T0/B0/secret")
            .header("X-Api-Key", "key-123")
            .basic_auth("svc", SecretString::from("hunter2"));
        let debug = format!("{:?}", req);
        assert!(!debug.contains("hooks.slack.com"));
        assert!(!debug.contains("key-123"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("X-Api-Key"));

        let bearer = format!("{:?}", HttpAuth::Bearer(SecretString::from("tok")));
        assert_eq!(bearer, "Bearer([REDACTED])");
    }

    #[test]
    fn qos_from_number() {
        assert_eq!(QoS::try_from(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(QoS::try_from(2).unwrap(), QoS::ExactlyOnce);
        assert!(QoS::try_from(3).is_err());
    }
}
