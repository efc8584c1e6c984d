//! Core configuration types and loading.

use super::receivers::{ReceiverConfig, ReceiverKind};
use super::validation::{validate_http_url, validate_jinja_template};
use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/herald/config.yaml";

/// Main configuration structure for herald.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Base URL rendered into messages as `external_url`.
    #[serde(default)]
    pub external_url: String,
    #[serde(default)]
    pub http: HttpConfig,
    /// SMTP server shared by every email receiver.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    /// Named templates that receiver fields can `{% include %}`.
    #[serde(default)]
    pub templates: HashMap<String, String>,
    #[serde(default)]
    pub receivers: Vec<ReceiverConfig>,
}

/// Outbound HTTP settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Total time allowed for one request.
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Upper bound for fetching an alert image before giving up on it.
    #[serde(default = "default_image_timeout", with = "humantime_serde")]
    pub image_timeout: Duration,
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_image_timeout() -> Duration {
    Duration::from_millis(500)
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
            image_timeout: default_image_timeout(),
        }
    }
}

/// SMTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Default sender address for email receivers.
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
    /// Supports `${ENV_VAR}` substitution.
    #[serde(default)]
    pub username: Option<String>,
    /// Supports `${ENV_VAR}` substitution.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: TlsMode,
    #[serde(default = "default_true")]
    pub tls_verify: bool,
}

/// TLS mode for SMTP connections.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    None,
    #[default]
    Starttls,
    Tls,
}

pub(crate) fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    ///
    /// # Errors
    /// Returns [`ConfigError::LoadError`] if the file cannot be read.
    /// Returns [`ConfigError::ValidationError`] if the YAML is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Validate everything that can be checked without building notifiers.
    ///
    /// Receiver settings are validated separately, when the registry builds
    /// each notifier.
    ///
    /// # Errors
    /// Returns a `Vec<ConfigError>` containing all validation errors found.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if !self.external_url.is_empty()
            && let Err(e) = validate_http_url("external_url", &self.external_url)
        {
            errors.push(ConfigError::ValidationError(e.to_string()));
        }

        if self.http.timeout.is_zero() {
            errors.push(ConfigError::ValidationError(
                "http.timeout must be greater than zero".to_string(),
            ));
        }

        let mut names = Vec::from_iter(self.templates.keys());
        names.sort();
        for name in names {
            if let Err(e) = validate_jinja_template(&self.templates[name]) {
                errors.push(ConfigError::InvalidTemplate {
                    name: name.clone(),
                    message: e,
                });
            }
        }

        let mut seen = HashSet::new();
        for receiver in &self.receivers {
            if receiver.name.trim().is_empty() {
                errors.push(ConfigError::ValidationError(format!(
                    "receiver of type '{}' has an empty name",
                    receiver.kind
                )));
                continue;
            }
            if !seen.insert(receiver.name.as_str()) {
                errors.push(ConfigError::ValidationError(format!(
                    "receiver '{}' defined more than once",
                    receiver.name
                )));
            }
            match receiver.receiver_kind() {
                Ok(ReceiverKind::Email) if self.smtp.is_none() => {
                    errors.push(ConfigError::InvalidReceiver {
                        name: receiver.name.clone(),
                        kind: receiver.kind.clone(),
                        message: "email receivers require an 'smtp' section".to_string(),
                    });
                }
                Ok(_) => {}
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
