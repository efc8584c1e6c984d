//! Configuration loading and validation for herald.
//!
//! This module handles loading the YAML configuration file, validation,
//! secret handling and the helpers integrations use to decode their
//! per-receiver settings.

mod env;
mod receivers;
mod secret;
mod settings;
mod types;
mod validation;

// Re-exports publics
pub use env::resolve_env_vars;
pub use receivers::{ReceiverConfig, ReceiverKind, UnknownReceiverKind};
pub use secret::{SecretResolver, SecretString, SecureSettings};
pub use settings::{DelimitedList, FlexibleNumber, decode, require};
pub use types::{Config, DEFAULT_CONFIG_PATH, HttpConfig, SmtpConfig, TlsMode};
pub(crate) use validation::{validate_field_template, validate_http_url};

#[cfg(test)]
mod tests;
