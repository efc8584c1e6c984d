//! Tests for Config loading and validation.

use super::*;
use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

// ============================================================
// Config Loading Tests
// ============================================================

#[test]
fn load_valid_config() {
    let config = Config::load(&fixture_path("config_valid.yaml")).unwrap();

    assert_eq!(config.external_url, "https://grafana.example.com");
    assert_eq!(config.http.timeout, Duration::from_secs(10));
    assert_eq!(config.http.image_timeout, Duration::from_millis(300));

    let smtp = config.smtp.as_ref().unwrap();
    assert_eq!(smtp.host, "smtp.example.com");
    assert_eq!(smtp.tls, TlsMode::Starttls);
    assert!(smtp.tls_verify);
    // Substitution happens when the transport is built, not at load time.
    assert_eq!(smtp.password.as_deref(), Some("${SMTP_PASSWORD}"));

    assert!(config.templates.contains_key("team.title"));

    assert_eq!(config.receivers.len(), 4);
    let email = &config.receivers[2];
    assert_eq!(email.receiver_kind().unwrap(), ReceiverKind::Email);
    assert!(email.disable_resolve_message);
    let pager = &config.receivers[3];
    assert_eq!(pager.uid.as_deref(), Some("pd-1"));
    assert!(pager.secure_settings.contains_key("integrationKey"));

    assert!(config.validate().is_ok());
}

#[test]
fn load_nonexistent_file_returns_load_error() {
    let result = Config::load(std::path::Path::new("/nonexistent/path/config.yaml"));
    match result.unwrap_err() {
        ConfigError::LoadError(msg) => {
            assert!(msg.contains("/nonexistent/path/config.yaml"));
        }
        e => panic!("Expected LoadError, got {:?}", e),
    }
}

#[test]
fn load_invalid_yaml_returns_validation_error() {
    let result = Config::load(&fixture_path("config_invalid_yaml.yaml"));
    match result.unwrap_err() {
        ConfigError::ValidationError(_) => {}
        e => panic!("Expected ValidationError, got {:?}", e),
    }
}

#[test]
fn minimal_config_uses_defaults() {
    let config = Config::from_yaml("receivers: []").unwrap();
    assert_eq!(config.external_url, "");
    assert_eq!(config.http.timeout, Duration::from_secs(30));
    assert_eq!(config.http.image_timeout, Duration::from_millis(500));
    assert!(config.smtp.is_none());
    assert!(config.validate().is_ok());
}

// ============================================================
// Validation Tests
// ============================================================

#[test]
fn validate_collects_all_errors() {
    let config = Config::load(&fixture_path("config_invalid_receivers.yaml")).unwrap();
    let errors = config.validate().unwrap_err();
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();

    assert_eq!(errors.len(), 5, "{:#?}", messages);
    assert!(messages.iter().any(|m| m.contains("external_url")));
    assert!(errors
        .iter()
        .any(|e| matches!(e, ConfigError::InvalidTemplate { name, .. } if name == "broken")));
    assert!(messages.iter().any(|m| m.contains("receiver 'dup' defined more than once")));
    assert!(messages.iter().any(|m| m.contains("unknown receiver type 'hipchat'")));
    assert!(messages
        .iter()
        .any(|m| m.contains("invalid receiver 'mail' (type email)") && m.contains("smtp")));
}

#[test]
fn validate_rejects_empty_receiver_name_and_zero_timeout() {
    let yaml = r#"
http:
  timeout: 0s
receivers:
  - name: ""
    type: webhook
"#;
    let config = Config::from_yaml(yaml).unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].to_string().contains("http.timeout"));
    assert!(errors[1].to_string().contains("empty name"));
}

#[test]
fn smtp_tls_modes_parse() {
    for (raw, expected) in [
        ("none", TlsMode::None),
        ("starttls", TlsMode::Starttls),
        ("tls", TlsMode::Tls),
    ] {
        let yaml = format!(
            "smtp:\n  host: h\n  port: 25\n  from_address: a@b.c\n  tls: {}\n",
            raw
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.smtp.unwrap().tls, expected);
    }
}
