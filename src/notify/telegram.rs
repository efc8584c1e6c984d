//! Telegram Bot API notifier.
//!
//! Sends the rendered message with `sendMessage`. When an alert carries an
//! image that can be downloaded, the photo follows in a second `sendPhoto`
//! call uploaded as `multipart/form-data`.

use crate::alert::AlertGroup;
use crate::config::{FlexibleNumber, SecretResolver, SecretString, decode, require, validate_field_template};
use crate::error::{NotifyError, SettingsError};
use crate::notify::{
    ImageData, Notifier, NotifierBase, NotifierDeps, send_checked, skip_resolved, truncate_field,
};
use crate::template::DEFAULT_MESSAGE;
use crate::transport::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Telegram limit for a text message.
const MAX_MESSAGE_CHARS: usize = 4096;

const PARSE_MODES: &[&str] = &["Markdown", "MarkdownV2", "HTML"];

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    bottoken: String,
    #[serde(default)]
    chatid: FlexibleNumber,
    #[serde(default)]
    message_thread_id: FlexibleNumber,
    #[serde(default)]
    parse_mode: String,
    #[serde(default)]
    disable_web_page_preview: bool,
    #[serde(default)]
    protect_content: bool,
    #[serde(default)]
    disable_notifications: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Numeric chat id or `@channel` name.
    pub chat_id: String,
    pub message_thread_id: Option<i64>,
    pub parse_mode: Option<String>,
    pub disable_web_page_preview: bool,
    pub protect_content: bool,
    pub disable_notifications: bool,
    pub message: Option<String>,
    pub api_url: String,
}

impl TelegramConfig {
    pub fn from_settings(
        settings: &serde_json::Value,
        secrets: &dyn SecretResolver,
    ) -> Result<Self, SettingsError> {
        let raw: RawSettings = decode(settings)?;
        let bot_token = require("bottoken", &secrets.get("bottoken", &raw.bottoken))?;
        let chat_id = require("chatid", &raw.chatid.to_string())?;

        let message_thread_id = raw.message_thread_id.as_i64().map_err(|_| {
            SettingsError::invalid(
                "message_thread_id",
                format!("must be an integer, got '{}'", raw.message_thread_id),
            )
        })?;

        let parse_mode = match raw.parse_mode.trim() {
            // Unset defaults to HTML.
            "" => Some("HTML".to_string()),
            mode if mode.eq_ignore_ascii_case("none") => None,
            mode => match PARSE_MODES.iter().find(|m| m.eq_ignore_ascii_case(mode)) {
                Some(m) => Some(m.to_string()),
                None => {
                    return Err(SettingsError::invalid(
                        "parse_mode",
                        format!("unknown parse mode '{}', expected one of {}, None", mode, PARSE_MODES.join(", ")),
                    ));
                }
            },
        };

        if let Some(message) = &raw.message {
            validate_field_template("message", message)?;
        }

        Ok(Self {
            bot_token: SecretString::new(bot_token),
            chat_id,
            message_thread_id,
            parse_mode,
            disable_web_page_preview: raw.disable_web_page_preview,
            protect_content: raw.protect_content,
            disable_notifications: raw.disable_notifications,
            message: raw.message,
            api_url: TELEGRAM_API_URL.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.bot_token.expose(), method)
    }
}

#[derive(Debug, Serialize)]
pub struct SendMessage<'a> {
    pub chat_id: &'a str,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<&'a str>,
    pub disable_web_page_preview: bool,
    pub protect_content: bool,
    pub disable_notification: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: String,
}

/// Telegram answers `{"ok": false, "description": ...}` on failure, usually
/// with a 4xx status.
fn check_body(response: &HttpResponse) -> Result<(), NotifyError> {
    match response.json::<ApiResponse>() {
        Ok(body) if !body.ok => Err(NotifyError::Retryable(format!(
            "telegram returned error: {}",
            body.description
        ))),
        _ => Ok(()),
    }
}

/// Minimal `multipart/form-data` encoder.
struct MultipartForm {
    boundary: String,
    body: BytesMut,
}

impl MultipartForm {
    fn new(boundary: String) -> Self {
        Self {
            boundary,
            body: BytesMut::new(),
        }
    }

    fn text(mut self, name: &str, value: &str) -> Self {
        self.body.put_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    fn file(mut self, name: &str, image: &ImageData) -> Self {
        self.body.put_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                self.boundary, name, image.file_name, image.content_type
            )
            .as_bytes(),
        );
        self.body.put_slice(&image.bytes);
        self.body.put_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> (Bytes, String) {
        self.body
            .put_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        let content_type = format!("multipart/form-data; boundary={}", self.boundary);
        (self.body.freeze(), content_type)
    }
}

pub struct TelegramNotifier {
    base: NotifierBase,
    config: TelegramConfig,
    deps: NotifierDeps,
}

impl TelegramNotifier {
    pub fn new(base: NotifierBase, config: TelegramConfig, deps: NotifierDeps) -> Self {
        Self { base, config, deps }
    }

    async fn send(&self, cancel: &CancellationToken, request: HttpRequest) -> Result<(), NotifyError> {
        let response = send_checked(self.deps.http.as_ref(), cancel, "telegram", request).await?;
        check_body(&response)
    }

    fn photo_request(&self, image: &ImageData) -> HttpRequest {
        let mut form = MultipartForm::new(self.deps.boundary.boundary())
            .text("chat_id", &self.config.chat_id);
        if let Some(thread) = self.config.message_thread_id {
            form = form.text("message_thread_id", &thread.to_string());
        }
        let (body, content_type) = form.file("photo", image).finish();
        HttpRequest::post(self.config.method_url("sendPhoto")).body(body, &content_type)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn base(&self) -> &NotifierBase {
        &self.base
    }

    async fn notify(&self, cancel: &CancellationToken, group: &AlertGroup) -> Result<(), NotifyError> {
        if skip_resolved(&self.base, group) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "notify_telegram",
            notifier_name = %self.base.name,
            group_key = %group.key()
        );

        async {
            let ctx = self.deps.render_context(&self.base, group);
            let mut tmpl = self.deps.templates.renderer(&ctx);
            let text = tmpl.render_or_default(self.config.message.as_deref(), DEFAULT_MESSAGE);
            tmpl.warn_on_error(&self.base.name, self.notifier_type());

            let message = SendMessage {
                chat_id: &self.config.chat_id,
                text: truncate_field(&self.base, "message", &text, MAX_MESSAGE_CHARS),
                message_thread_id: self.config.message_thread_id,
                parse_mode: self.config.parse_mode.as_deref(),
                disable_web_page_preview: self.config.disable_web_page_preview,
                protect_content: self.config.protect_content,
                disable_notification: self.config.disable_notifications,
            };
            let request = HttpRequest::post(self.config.method_url("sendMessage")).json(&message)?;
            self.send(cancel, request).await?;

            if let Some(image) = self.deps.first_image_data(cancel, &self.base, group).await {
                self.send(cancel, self.photo_request(&image)).await?;
                tracing::debug!(file_name = %image.file_name, "Telegram photo sent");
            }
            tracing::debug!("Telegram notification sent");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("name", &self.base.name)
            .field("chat_id", &self.config.chat_id)
            .field("parse_mode", &self.config.parse_mode)
            .finish()
    }
}
