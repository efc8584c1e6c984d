//! Notification delivery for alert groups.
//!
//! Every integration implements the [`Notifier`] trait: it turns an
//! [`AlertGroup`] into one outbound notification (plus follow-up calls for
//! the stateful integrations) and reports success, a retryable failure or a
//! permanent failure.
//!
//! # Architecture
//!
//! ```text
//! AlertGroup -> RenderContext -> TemplateRenderer -> vendor payload -> transport
//! ```
//!
//! Notifiers hold no global state. Transports, clock, multipart boundary
//! generator and image provider are injected through [`NotifierDeps`], so
//! tests can swap any of them for fakes.
//!
//! # Key Features
//!
//! - **Resolved suppression**: receivers with `disable_resolve_message` skip
//!   resolved groups without any network call
//! - **Retry classification**: 408/429/5xx and transport failures are
//!   retryable, other rejections are permanent
//! - **Template containment**: broken templates degrade fields, never abort
//! - **Dedup identity**: stateful integrations key their entity on the
//!   group key hash

pub mod discord;
pub mod dooray;
pub mod email;
pub mod jira;
pub mod kafka;
pub mod line;
pub mod mqtt;
pub mod opsgenie;
pub mod pagerduty;
pub mod registry;
pub mod slack;
pub mod teams;
pub mod telegram;
pub mod threema;
pub mod victorops;
pub mod webex;
pub mod webhook;
pub mod wecom;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

pub use registry::{DispatchOutcome, NotifierRegistry};

use crate::alert::AlertGroup;
use crate::config::{Config, ReceiverConfig, ReceiverKind, SmtpConfig};
use crate::error::{ConfigError, NotifyError};
use crate::template::{RenderContext, TemplateEngine, truncate};
use crate::transport::{
    EmailTransport, HttpRequest, HttpResponse, HttpTransport, MqttConnector, ReqwestTransport,
    RumqttConnector, SmtpEmailTransport,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Longest response body excerpt included in error messages.
const ERROR_BODY_EXCERPT: usize = 256;

// =============================================================================
// Notifier Trait
// =============================================================================

/// Identity and switches shared by every notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierBase {
    pub name: String,
    pub kind: ReceiverKind,
    pub uid: Option<String>,
    pub disable_resolve_message: bool,
}

impl NotifierBase {
    pub fn new(name: impl Into<String>, kind: ReceiverKind) -> Self {
        Self {
            name: name.into(),
            kind,
            uid: None,
            disable_resolve_message: false,
        }
    }

    pub fn from_receiver(receiver: &ReceiverConfig, kind: ReceiverKind) -> Self {
        Self {
            name: receiver.name.clone(),
            kind,
            uid: receiver.uid.clone(),
            disable_resolve_message: receiver.disable_resolve_message,
        }
    }
}

/// Abstract notifier trait for delivering alert groups to one receiver.
///
/// Implementations must be `Send + Sync`: the registry calls them
/// concurrently from one task per receiver. A notifier never retries on its
/// own (Kafka's single credential refresh excepted); the returned
/// [`NotifyError`] tells the caller whether a retry makes sense.
///
/// # Example
///
/// ```ignore
/// struct MyNotifier { base: NotifierBase }
///
/// #[async_trait]
/// impl Notifier for MyNotifier {
///     fn base(&self) -> &NotifierBase { &self.base }
///     async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Notifier: Send + Sync {
    fn base(&self) -> &NotifierBase;

    /// Unique name of this receiver (e.g., "ops-slack").
    fn name(&self) -> &str {
        &self.base().name
    }

    /// Integration type (e.g., "slack", "pagerduty").
    fn notifier_type(&self) -> &str {
        self.base().kind.as_str()
    }

    fn uid(&self) -> Option<&str> {
        self.base().uid.as_deref()
    }

    /// Whether resolved groups are delivered.
    fn send_resolved(&self) -> bool {
        !self.base().disable_resolve_message
    }

    /// Deliver one alert group.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Delivered, or deliberately skipped
    /// * `Err(NotifyError)` - Check [`NotifyError::is_retryable`]
    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup)
    -> Result<(), NotifyError>;
}

impl std::fmt::Debug for dyn Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("name", &self.name())
            .field("type", &self.notifier_type())
            .finish()
    }
}

// =============================================================================
// Injected collaborators
// =============================================================================

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Generates multipart form boundaries.
pub trait BoundaryGenerator: Send + Sync {
    fn boundary(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBoundary;

impl BoundaryGenerator for RandomBoundary {
    fn boundary(&self) -> String {
        random_alphanumeric(30)
    }
}

pub(crate) fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Raw image content for integrations that upload files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Resolves an alert's image reference.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Public URL for the image, if it has one.
    async fn url(&self, cancel: &CancellationToken, image_ref: &str)
    -> Result<Option<String>, String>;

    /// Image bytes, if they can be retrieved.
    async fn data(
        &self,
        cancel: &CancellationToken,
        image_ref: &str,
    ) -> Result<Option<ImageData>, String>;
}

/// Treats image references as `http(s)` URLs and downloads them through the
/// HTTP transport.
pub struct UrlImageProvider {
    http: Arc<dyn HttpTransport>,
}

impl UrlImageProvider {
    pub fn new(http: Arc<dyn HttpTransport>) -> Self {
        Self { http }
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

#[async_trait]
impl ImageProvider for UrlImageProvider {
    async fn url(
        &self,
        _cancel: &CancellationToken,
        image_ref: &str,
    ) -> Result<Option<String>, String> {
        Ok(is_http_url(image_ref).then(|| image_ref.to_string()))
    }

    async fn data(
        &self,
        cancel: &CancellationToken,
        image_ref: &str,
    ) -> Result<Option<ImageData>, String> {
        if !is_http_url(image_ref) {
            return Ok(None);
        }
        let response = self
            .http
            .send_http(cancel, HttpRequest::get(image_ref))
            .await
            .map_err(|e| e.to_string())?;
        if !response.is_success() {
            return Err(format!("image download returned status {}", response.status));
        }
        let file_name = image_ref
            .rsplit('/')
            .next()
            .and_then(|s| s.split('?').next())
            .filter(|s| !s.is_empty())
            .unwrap_or("image.png")
            .to_string();
        let content_type = if file_name.ends_with(".jpg") || file_name.ends_with(".jpeg") {
            "image/jpeg"
        } else {
            "image/png"
        };
        Ok(Some(ImageData {
            file_name,
            content_type: content_type.to_string(),
            bytes: response.body,
        }))
    }
}

/// Everything a notifier needs besides its own settings.
#[derive(Clone)]
pub struct NotifierDeps {
    pub http: Arc<dyn HttpTransport>,
    pub email: Option<Arc<dyn EmailTransport>>,
    pub mqtt: Arc<dyn MqttConnector>,
    pub images: Arc<dyn ImageProvider>,
    pub clock: Arc<dyn Clock>,
    pub boundary: Arc<dyn BoundaryGenerator>,
    pub templates: Arc<TemplateEngine>,
    /// Base URL exposed to templates as `external_url`.
    pub external_url: String,
    /// Default sender for email receivers.
    pub email_from: String,
    /// Upper bound for one image lookup.
    pub image_timeout: Duration,
}

impl NotifierDeps {
    /// Production defaults around the given HTTP transport.
    pub fn new(http: Arc<dyn HttpTransport>, templates: Arc<TemplateEngine>) -> Self {
        Self {
            images: Arc::new(UrlImageProvider::new(http.clone())),
            http,
            email: None,
            mqtt: Arc::new(RumqttConnector::new(Duration::from_secs(30))),
            clock: Arc::new(SystemClock),
            boundary: Arc::new(RandomBoundary),
            templates,
            external_url: String::new(),
            email_from: String::new(),
            image_timeout: Duration::from_millis(500),
        }
    }

    /// Wires the production transports described by the loaded config.
    ///
    /// # Errors
    ///
    /// Fails when a named template does not compile, the HTTP client cannot
    /// be built, or the `smtp` section is unusable.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let templates = Arc::new(TemplateEngine::with_templates(&config.templates)?);
        let http: Arc<dyn HttpTransport> = Arc::new(
            ReqwestTransport::new(config.http.timeout)
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?,
        );

        let mut deps = Self::new(http, templates);
        deps.mqtt = Arc::new(RumqttConnector::new(config.http.timeout));
        deps.external_url = config.external_url.clone();
        deps.image_timeout = config.http.image_timeout;
        if let Some(smtp) = &config.smtp {
            deps.email = Some(Arc::new(SmtpEmailTransport::from_config(smtp)?));
            deps.email_from = sender_mailbox(smtp);
        }
        Ok(deps)
    }

    /// Render context for one attempt of `base` on `group`.
    pub fn render_context(&self, base: &NotifierBase, group: &AlertGroup) -> RenderContext {
        RenderContext::new(group, &base.name, &self.external_url)
    }

    /// Builds the render context and attaches image URLs for alerts that
    /// carry an image reference.
    ///
    /// Lookups run concurrently, each bounded by `image_timeout`, so the
    /// enrichment never takes longer than one timeout. Failures only drop the
    /// enrichment and are logged.
    pub async fn render_context_with_images(
        &self,
        cancel: &CancellationToken,
        base: &NotifierBase,
        group: &AlertGroup,
    ) -> RenderContext {
        let mut ctx = self.render_context(base, group);
        let lookups = group
            .alerts()
            .iter()
            .enumerate()
            .filter_map(|(index, alert)| {
                let image_ref = alert.image_ref.as_deref()?;
                let lookup = self.images.url(cancel, image_ref);
                Some(async move { (index, tokio::time::timeout(self.image_timeout, lookup).await) })
            });
        for (index, result) in join_all(lookups).await {
            match result {
                Ok(Ok(Some(url))) => ctx.attach_image_url(index, &url),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        notifier_name = %base.name,
                        error = %e,
                        "Failed to resolve alert image, sending without it"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        notifier_name = %base.name,
                        timeout_ms = self.image_timeout.as_millis() as u64,
                        "Timed out resolving alert image, sending without it"
                    );
                }
            }
        }
        ctx
    }

    /// Downloads the first retrievable image of the group. All attempts
    /// share one `image_timeout` deadline. Errors are logged and yield `None`.
    pub async fn first_image_data(
        &self,
        cancel: &CancellationToken,
        base: &NotifierBase,
        group: &AlertGroup,
    ) -> Option<ImageData> {
        let deadline = tokio::time::Instant::now() + self.image_timeout;
        for image_ref in group.alerts().iter().filter_map(|a| a.image_ref.as_deref()) {
            match tokio::time::timeout_at(deadline, self.images.data(cancel, image_ref)).await {
                Ok(Ok(Some(image))) => return Some(image),
                Ok(Ok(None)) => continue,
                Ok(Err(e)) => {
                    tracing::warn!(notifier_name = %base.name, error = %e, "Failed to fetch alert image");
                }
                Err(_) => {
                    tracing::warn!(notifier_name = %base.name, "Timed out fetching alert image");
                    break;
                }
            }
        }
        None
    }
}

impl std::fmt::Debug for NotifierDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierDeps")
            .field("external_url", &self.external_url)
            .field("email", &self.email.is_some())
            .field("image_timeout", &self.image_timeout)
            .finish()
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// True when the group is resolved and the receiver does not want resolved
/// notifications. Logs the skip.
pub(crate) fn skip_resolved(base: &NotifierBase, group: &AlertGroup) -> bool {
    if group.is_resolved() && base.disable_resolve_message {
        tracing::debug!(
            notifier_name = %base.name,
            notifier_type = %base.kind,
            group_key = %group.key(),
            "Resolved group suppressed by disable_resolve_message"
        );
        return true;
    }
    false
}

/// `Name <address>` when a display name is configured.
fn sender_mailbox(smtp: &SmtpConfig) -> String {
    match smtp.from_name.as_deref().filter(|n| !n.trim().is_empty()) {
        Some(name) => format!("{} <{}>", name, smtp.from_address),
        None => smtp.from_address.clone(),
    }
}

/// Short, single-line excerpt of a response body for error messages.
pub(crate) fn body_excerpt(response: &HttpResponse) -> String {
    let text = response.text().replace(['\n', '\r'], " ");
    truncate(text.trim(), ERROR_BODY_EXCERPT).0
}

/// Maps a vendor response to the delivery outcome.
///
/// 2xx is success. Statuses listed in `permanent` are rejections the vendor
/// documents as final; every other failure is retryable.
pub(crate) fn check_response(
    vendor: &str,
    response: &HttpResponse,
    permanent: &[u16],
) -> Result<(), NotifyError> {
    if response.is_success() {
        return Ok(());
    }
    let message = format!(
        "{} returned status {}: {}",
        vendor,
        response.status,
        body_excerpt(response)
    );
    if permanent.contains(&response.status) {
        Err(NotifyError::Permanent(message))
    } else {
        Err(NotifyError::Retryable(message))
    }
}

/// Sends one request and checks the response status. Every failure status
/// is retryable.
pub(crate) async fn send_checked(
    http: &dyn HttpTransport,
    cancel: &CancellationToken,
    vendor: &str,
    request: HttpRequest,
) -> Result<HttpResponse, NotifyError> {
    send_checked_rejecting(http, cancel, vendor, &[], request).await
}

/// Like [`send_checked`], with `permanent` naming the statuses the vendor
/// documents as a final rejection of the payload.
pub(crate) async fn send_checked_rejecting(
    http: &dyn HttpTransport,
    cancel: &CancellationToken,
    vendor: &str,
    permanent: &[u16],
    request: HttpRequest,
) -> Result<HttpResponse, NotifyError> {
    let response = http.send_http(cancel, request).await?;
    check_response(vendor, &response, permanent)?;
    Ok(response)
}

/// Logs a truncation once per field.
pub(crate) fn truncate_field(
    base: &NotifierBase,
    field: &'static str,
    text: &str,
    max_chars: usize,
) -> String {
    let (out, cut) = truncate(text, max_chars);
    if cut {
        tracing::warn!(
            notifier_name = %base.name,
            notifier_type = %base.kind,
            field = field,
            max_chars = max_chars,
            "Truncated field to vendor limit"
        );
    }
    out
}
