//! Template and URL validation utilities.

use crate::error::SettingsError;
use minijinja::Environment;
use reqwest::Url;

/// Validates Jinja template syntax.
pub(crate) fn validate_jinja_template(source: &str) -> Result<(), String> {
    let mut env = Environment::new();
    env.add_template("_validate", source)
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Validates that `value` is an absolute `http`/`https` URL.
///
/// Templated URLs (containing `{{`) are accepted as-is; they are only known
/// after rendering.
pub(crate) fn validate_http_url(field: &'static str, value: &str) -> Result<(), SettingsError> {
    if value.contains("{{") {
        return Ok(());
    }
    let url = Url::parse(value)
        .map_err(|e| SettingsError::invalid(field, format!("not a valid URL: {}", e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SettingsError::invalid(
            field,
            format!("unsupported scheme '{}', expected http or https", other),
        )),
    }
}

/// Validates a field template at configuration time, tagging the error with
/// the field name.
pub(crate) fn validate_field_template(
    field: &'static str,
    source: &str,
) -> Result<(), SettingsError> {
    validate_jinja_template(source).map_err(|e| SettingsError::invalid(field, e))
}
