//! Environment variable substitution.

use crate::error::ConfigError;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static ENV_VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex")
});

/// Resolves `${VAR_NAME}` patterns in a string.
///
/// Every undefined variable is reported, not just the first one.
pub fn resolve_env_vars(value: &str) -> Result<String, ConfigError> {
    let mut missing: Vec<String> = Vec::new();

    let result = ENV_VAR_REGEX.replace_all(value, |cap: &Captures| {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(var_value) => var_value,
            Err(_) => {
                if !missing.iter().any(|m| m.as_str() == var_name) {
                    missing.push(var_name.to_string());
                }
                String::new()
            }
        }
    });

    if missing.is_empty() {
        Ok(result.into_owned())
    } else {
        Err(ConfigError::ValidationError(format!(
            "undefined environment variable{}: {}",
            if missing.len() > 1 { "s" } else { "" },
            missing.join(", ")
        )))
    }
}
