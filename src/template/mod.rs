//! Message templating for notifications.
//!
//! Notifier fields (titles, messages, descriptions, even URLs) are
//! Jinja2-style templates powered by minijinja, rendered against a
//! [`RenderContext`] built once per notification attempt.
//!
//! # Error containment
//!
//! Rendering never aborts a notification. A [`TemplateRenderer`] collects
//! every error raised while rendering the fields of one attempt and hands
//! back an empty string for the broken field. Callers check
//! [`TemplateRenderer::first_error`] once, after all fields are rendered.
//!
//! ```ignore
//! let ctx = RenderContext::new(&group, "ops", "https://grafana.example.com");
//! let mut tmpl = engine.renderer(&ctx);
//! let title = tmpl.render(&config.title);
//! let url = tmpl.render_or_raw(&config.url);
//! tmpl.warn_on_error("slack-ops", "slack");
//! ```

mod context;
mod truncate;

pub use context::{IMAGE_URL_ANNOTATION, RenderAlert, RenderContext};
pub use truncate::{ELLIPSIS, truncate, truncate_bytes};

use crate::error::{ConfigError, TemplateError};
use minijinja::{Environment, ErrorKind, UndefinedBehavior, Value};
use std::collections::HashMap;

/// Default title: status, firing count and grouping label values.
pub const DEFAULT_TITLE: &str = r#"{% include "default.title" %}"#;

/// Default message body listing firing and resolved alerts.
pub const DEFAULT_MESSAGE: &str = r#"{% include "default.message" %}"#;

const DEFAULT_TITLE_SOURCE: &str = concat!(
    r#"[{{ status | upper }}{% if status == "firing" %}:{{ firing | length }}{% endif %}]"#,
    r#"{% for _, value in group_labels | dictsort %} {{ value }}{% endfor %}"#,
);

const DEFAULT_MESSAGE_SOURCE: &str = r#"{% macro alert_list(items) %}{% for alert in items %}
Labels:
{% for key, value in alert.labels | dictsort %} - {{ key }} = {{ value }}
{% endfor %}{% if alert.annotations %}Annotations:
{% for key, value in alert.annotations | dictsort %} - {{ key }} = {{ value }}
{% endfor %}{% endif %}{% if alert.generator_url %}Source: {{ alert.generator_url }}
{% endif %}{% endfor %}{% endmacro %}{% if firing %}**Firing**
{{ alert_list(firing) }}{% endif %}{% if resolved %}**Resolved**
{{ alert_list(resolved) }}{% endif %}"#;

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("default.title", DEFAULT_TITLE_SOURCE),
    ("default.message", DEFAULT_MESSAGE_SOURCE),
];

/// Picks the configured template, or `default` when the override is blank.
pub fn template_or_default<'a>(custom: Option<&'a str>, default: &'a str) -> &'a str {
    match custom {
        Some(source) if !source.trim().is_empty() => source,
        _ => default,
    }
}

/// Holds the minijinja environment with the built-in and user-defined named
/// templates.
///
/// The engine is immutable after construction and shared (`Arc`) by every
/// notifier.
pub struct TemplateEngine {
    env: Environment<'static>,
    custom_names: Vec<String>,
}

impl TemplateEngine {
    /// Engine with only the built-in `default.*` templates.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidTemplate`] if a built-in template does not compile.
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_builtins(BUILTIN_TEMPLATES)
    }

    fn with_builtins(builtins: &[(&'static str, &'static str)]) -> Result<Self, ConfigError> {
        let mut env = Environment::new();
        // Missing fields render as empty strings instead of failing.
        env.set_undefined_behavior(UndefinedBehavior::Lenient);
        for &(name, source) in builtins {
            env.add_template(name, source)
                .map_err(|e| ConfigError::InvalidTemplate {
                    name: name.to_string(),
                    message: e.to_string(),
                })?;
        }
        Ok(Self {
            env,
            custom_names: Vec::new(),
        })
    }

    /// Engine with additional named templates that notifier fields can
    /// `{% include %}`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidTemplate`] if a template does not compile or tries
    /// to replace a built-in one.
    pub fn with_templates(templates: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut engine = Self::new()?;
        let mut names: Vec<&String> = templates.keys().collect();
        names.sort();
        for name in names {
            if name.starts_with("default.") {
                return Err(ConfigError::InvalidTemplate {
                    name: name.clone(),
                    message: "the 'default.' prefix is reserved".to_string(),
                });
            }
            engine
                .env
                .add_template_owned(name.clone(), templates[name].clone())
                .map_err(|e| ConfigError::InvalidTemplate {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            engine.custom_names.push(name.clone());
        }
        Ok(engine)
    }

    /// Starts a rendering session for one notification attempt.
    pub fn renderer(&self, ctx: &RenderContext) -> TemplateRenderer<'_> {
        TemplateRenderer {
            env: &self.env,
            value: ctx.template_value(),
            errors: Vec::new(),
        }
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("templates", &self.custom_names)
            .finish()
    }
}

/// Renders the fields of one notification attempt, collecting errors.
pub struct TemplateRenderer<'a> {
    env: &'a Environment<'static>,
    value: Value,
    errors: Vec<TemplateError>,
}

impl TemplateRenderer<'_> {
    /// Renders `source`. On failure the error is recorded and an empty string
    /// is returned.
    pub fn render(&mut self, source: &str) -> String {
        match self.env.render_str(source, &self.value) {
            Ok(text) => text,
            Err(e) => {
                self.errors.push(convert_error(&e));
                String::new()
            }
        }
    }

    /// Renders `source`, returning `source` itself when rendering fails.
    ///
    /// Meant for URL and token fields where an empty value is worse than the
    /// raw configured one.
    pub fn render_or_raw(&mut self, source: &str) -> String {
        let before = self.errors.len();
        let text = self.render(source);
        if self.errors.len() > before {
            source.to_string()
        } else {
            text
        }
    }

    /// Renders `custom` if set and non-blank, else `default`.
    pub fn render_or_default(&mut self, custom: Option<&str>, default: &str) -> String {
        self.render(template_or_default(custom, default))
    }

    pub fn first_error(&self) -> Option<&TemplateError> {
        self.errors.first()
    }

    pub fn errors(&self) -> &[TemplateError] {
        &self.errors
    }

    /// Logs the first collected error, once, as a warning.
    pub fn warn_on_error(&self, notifier_name: &str, notifier_type: &str) {
        if let Some(err) = self.first_error() {
            tracing::warn!(
                notifier_name = %notifier_name,
                notifier_type = %notifier_type,
                error = %err,
                error_count = self.errors.len(),
                "Failed to render notification template, using fallback values"
            );
        }
    }
}

fn convert_error(err: &minijinja::Error) -> TemplateError {
    match err.kind() {
        ErrorKind::TemplateNotFound => TemplateError::NotFound {
            name: err.detail().unwrap_or("unknown").to_string(),
        },
        _ => TemplateError::RenderFailed {
            message: err.to_string(),
        },
    }
}
