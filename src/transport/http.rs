//! `reqwest` backed HTTP transport.

use super::{HttpAuth, HttpRequest, HttpResponse, HttpTransport, Method};
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// HTTP transport over a shared `reqwest::Client` (connection pooling).
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a client with the given total request timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("herald/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.auth {
            HttpAuth::None => builder,
            HttpAuth::Basic { username, password } => {
                builder.basic_auth(username, Some(password.expose()))
            }
            HttpAuth::Bearer(token) => builder.bearer_auth(token.expose()),
        };
        if request.body.is_empty() {
            builder
        } else {
            builder.body(request.body)
        }
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = self.build(request).send().await.map_err(convert_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(convert_error)?;
        Ok(HttpResponse { status, body })
    }
}

/// Maps reqwest errors without leaking the request URL.
fn convert_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }
    if err.is_builder() {
        return TransportError::InvalidRequest(err.without_url().to_string());
    }
    TransportError::Request(err.without_url().to_string())
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send_http(
        &self,
        cancel: &CancellationToken,
        request: HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        let method = request.method;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(method = %method, "HTTP request cancelled");
                Err(TransportError::Cancelled)
            }
            result = self.execute(request) => result,
        }
    }
}
