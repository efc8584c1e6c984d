//! Secret values: a redacting string wrapper and the resolver handed to
//! receiver settings parsers.

use super::env::resolve_env_vars;
use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;

/// Wrapper for secrets that never appears in logs.
///
/// Tokens, passwords and webhook URLs carrying credentials are stored as
/// `SecretString`. The `Debug` and `Display` implementations always show
/// `[REDACTED]` instead of the actual value.
///
/// # Example
///
/// ```
/// use herald::config::SecretString;
///
/// let secret = SecretString::new("xoxb-123".to_string());
/// assert_eq!(format!("{:?}", secret), "[REDACTED]");
/// assert_eq!(secret.expose(), "xoxb-123");
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: String) -> Self {
        SecretString(s)
    }

    /// Exposes the underlying secret value.
    ///
    /// Never pass the result to logging functions.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        SecretString(s.to_string())
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(SecretString::new(s))
    }
}

/// Looks up secret receiver fields.
///
/// `get` returns the named secret when one is configured, otherwise the
/// plaintext `fallback` (usually the same field from the non-secret
/// settings). Settings parsers only ever see this trait, so tests can hand
/// them any secret source.
pub trait SecretResolver: Send + Sync {
    fn get(&self, key: &str, fallback: &str) -> String;
}

/// The `secure_settings` of one receiver, with `${ENV_VAR}` references
/// already substituted.
#[derive(Clone, Default)]
pub struct SecureSettings {
    values: HashMap<String, SecretString>,
}

impl SecureSettings {
    /// Resolves environment variable references in every value.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] naming the key whose value references
    /// an undefined variable. The value itself is never included.
    pub fn resolve(raw: &HashMap<String, SecretString>) -> Result<Self, ConfigError> {
        let mut values = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            let resolved = resolve_env_vars(value.expose()).map_err(|e| {
                ConfigError::ValidationError(format!("secure_settings.{}: {}", key, e))
            })?;
            values.insert(key.clone(), SecretString::new(resolved));
        }
        Ok(Self { values })
    }

    /// Builds secure settings from literal pairs, without env substitution.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), SecretString::new(v.into())))
                .collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl SecretResolver for SecureSettings {
    fn get(&self, key: &str, fallback: &str) -> String {
        match self.values.get(key) {
            Some(secret) if !secret.is_empty() => secret.expose().to_string(),
            _ => fallback.to_string(),
        }
    }
}

impl std::fmt::Debug for SecureSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("SecureSettings").field("keys", &keys).finish()
    }
}
