//! SMTP transport using `lettre`.

use super::{EmailMessage, EmailTransport};
use crate::config::{SmtpConfig, TlsMode, resolve_env_vars};
use crate::error::{ConfigError, TransportError};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio_util::sync::CancellationToken;

/// Sends email through one SMTP server.
pub struct SmtpEmailTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailTransport {
    /// Build the transport from the shared `smtp` section.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] when credentials reference undefined
    /// environment variables, only one of username/password is set, or TLS
    /// parameters cannot be built.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, ConfigError> {
        let username = config
            .username
            .as_deref()
            .map(resolve_env_vars)
            .transpose()
            .map_err(|e| ConfigError::ValidationError(format!("smtp.username: {}", e)))?;
        let password = config
            .password
            .as_deref()
            .map(resolve_env_vars)
            .transpose()
            .map_err(|e| ConfigError::ValidationError(format!("smtp.password: {}", e)))?;

        let host = config.host.as_str();
        let tls_parameters = |host: &str| -> Result<TlsParameters, ConfigError> {
            let mut builder = TlsParameters::builder(host.to_string());
            if !config.tls_verify {
                builder = builder.dangerous_accept_invalid_certs(true);
            }
            builder
                .build()
                .map_err(|e| ConfigError::ValidationError(format!("smtp TLS configuration error: {}", e)))
        };

        let builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(config.port);
        let builder = match config.tls {
            TlsMode::None => builder,
            TlsMode::Starttls => builder.tls(Tls::Required(tls_parameters(host)?)),
            TlsMode::Tls => builder.tls(Tls::Wrapper(tls_parameters(host)?)),
        };

        let builder = match (username, password) {
            (Some(u), Some(p)) => builder.credentials(Credentials::new(u, p)),
            (Some(_), None) => {
                return Err(ConfigError::ValidationError(
                    "smtp.password required when smtp.username is set".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(ConfigError::ValidationError(
                    "smtp.username required when smtp.password is set".to_string(),
                ));
            }
            (None, None) => builder,
        };

        Ok(Self {
            inner: builder.build(),
        })
    }
}

/// Converts an [`EmailMessage`] into a lettre message, multipart when an
/// HTML body is present.
pub(crate) fn build_message(message: &EmailMessage) -> Result<Message, TransportError> {
    let from: Mailbox = message.from.parse().map_err(|e| {
        TransportError::InvalidRequest(format!("invalid 'from' address '{}': {}", message.from, e))
    })?;

    let mut builder = Message::builder().from(from).subject(message.subject.as_str());
    for addr in &message.to {
        let mailbox: Mailbox = addr.parse().map_err(|e| {
            TransportError::InvalidRequest(format!("invalid recipient address '{}': {}", addr, e))
        })?;
        builder = builder.to(mailbox);
    }

    let result = match &message.html_body {
        Some(html) => builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(message.text_body.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html.clone()),
                ),
        ),
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(message.text_body.clone()),
    };
    result.map_err(|e| TransportError::InvalidRequest(format!("failed to build email: {}", e)))
}

/// Check if an SMTP error is permanent.
///
/// Uses word boundary matching so SMTP codes inside addresses or other text
/// do not count.
pub(crate) fn is_permanent_error(error_str: &str) -> bool {
    let contains_smtp_code = |code: &str| {
        error_str
            .split(|c: char| !c.is_ascii_digit())
            .any(|segment| segment == code)
    };
    let lower = error_str.to_lowercase();

    lower.contains("authentication")
        || lower.contains("invalid credentials")
        || ["535", "550", "551", "552", "553", "554"]
            .iter()
            .any(|code| contains_smtp_code(code))
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send_email(
        &self,
        cancel: &CancellationToken,
        message: EmailMessage,
    ) -> Result<(), TransportError> {
        let email = build_message(&message)?;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = self.inner.send(email) => result,
        };
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let error_str = e.to_string();
                if is_permanent_error(&error_str) {
                    Err(TransportError::Rejected(error_str))
                } else {
                    Err(TransportError::Email(error_str))
                }
            }
        }
    }
}
