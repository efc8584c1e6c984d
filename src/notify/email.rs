//! Email notifier.
//!
//! Sends through the shared SMTP transport. Without `singleEmail` every
//! recipient gets an individual message so one rejected address does not block
//! the others.

use crate::alert::AlertGroup;
use crate::config::{DelimitedList, SecretResolver, decode, validate_field_template};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{Notifier, NotifierBase, NotifierDeps, skip_resolved};
use crate::template::{DEFAULT_MESSAGE, DEFAULT_TITLE};
use crate::transport::{EmailMessage, EmailTransport};
use async_trait::async_trait;
use lettre::message::Mailbox;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    addresses: DelimitedList,
    #[serde(default)]
    single_email: bool,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub addresses: Vec<String>,
    pub single_email: bool,
    pub subject: Option<String>,
    pub message: Option<String>,
}

impl EmailConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        _secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;
        if raw.addresses.is_empty() {
            return Err(SettingsError::Missing("addresses"));
        }
        for addr in raw.addresses.iter() {
            addr.parse::<Mailbox>().map_err(|e| {
                SettingsError::invalid("addresses", format!("invalid address '{}': {}", addr, e))
            })?;
        }
        if let Some(subject) = &raw.subject {
            validate_field_template("subject", subject)?;
        }
        if let Some(message) = &raw.message {
            validate_field_template("message", message)?;
        }
        Ok(Self {
            addresses: raw.addresses.iter().map(str::to_string).collect(),
            single_email: raw.single_email,
            subject: raw.subject,
            message: raw.message,
        })
    }
}

pub struct EmailNotifier {
    base: NotifierBase,
    config: EmailConfig,
    deps: NotifierDeps,
}

impl EmailNotifier {
    pub fn new(base: NotifierBase, config: EmailConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }

    fn transport(&self) -> Result<&Arc<dyn EmailTransport>, NotifyError> {
        self.deps
            .email
            .as_ref()
            .ok_or_else(|| NotifyError::Permanent("no SMTP server configured".to_string()))
    }

    /// One recipient list per message to send.
    fn batches(&self) -> Vec<Vec<String>> {
        if self.config.single_email {
            vec![self.config.addresses.clone()]
        } else {
            self.config
                .addresses
                .iter()
                .map(|addr| vec![addr.clone()])
                .collect()
        }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    /// Returns `Ok` if at least one message was accepted. When every message
    /// fails, the first error is returned.
    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }
        let transport = self.transport()?;

        let span = tracing::info_span!(
            "notify_email",
            notifier_name = %self.base.name,
            group_key = %group.key()
        );

        async {
            let ctx = self
                .deps
                .render_context_with_images(cancel, &self.base, group)
                .await;
            let mut tmpl = self.deps.templates.renderer(&ctx);
            let subject = tmpl.render_or_default(self.config.subject.as_deref(), DEFAULT_TITLE);
            let body = tmpl.render_or_default(self.config.message.as_deref(), DEFAULT_MESSAGE);
            tmpl.warn_on_error(&self.base.name, self.notifier_type());

            let mut sent = 0usize;
            let mut first_error: Option<NotifyError> = None;
            let batches = self.batches();
            let total = batches.len();

            for to in batches {
                let message = EmailMessage {
                    from: self.deps.email_from.clone(),
                    to: to.clone(),
                    subject: subject.clone(),
                    text_body: body.clone(),
                    html_body: None,
                };
                match transport.send_email(cancel, message).await {
                    Ok(()) => {
                        sent += 1;
                        tracing::debug!(recipients = to.len(), "Email accepted by SMTP server");
                    }
                    Err(e) => {
                        let err = NotifyError::from(e);
                        if err == NotifyError::Cancelled {
                            return Err(err);
                        }
                        tracing::warn!(
                            recipients = %to.join(", "),
                            error = %err,
                            "Failed to send email, continuing with remaining recipients"
                        );
                        metrics::counter!(
                            "herald_email_recipient_errors_total",
                            "notifier_name" => self.base.name.clone()
                        )
                        .increment(1);
                        first_error.get_or_insert(err);
                    }
                }
            }

            tracing::info!(success = sent, failed = total - sent, total, "Email send complete");
            match first_error {
                Some(err) if sent == 0 => Err(err),
                _ => Ok(()),
            }
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for EmailNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailNotifier")
            .field("name", &self.base.name)
            .field("to_count", &self.config.addresses.len())
            .field("single_email", &self.config.single_email)
            .finish()
    }
}
