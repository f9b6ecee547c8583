//! Loading configuration documents from disk

use apigate_core::{ConfigError, Gateway, GatewayConfig, PlanCompiler, ScopeLevel};
use apigate_test_utils::fixtures::{GATEWAY_YAML, SIGNING_CERT_PEM, SIGNING_KEY_PEM};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;
use tempfile::{Builder, NamedTempFile, TempDir};

fn write_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn loads_yaml_by_extension() {
    for suffix in [".yaml", ".yml"] {
        let file = write_file(suffix, GATEWAY_YAML);
        let config = GatewayConfig::load(file.path()).unwrap();

        assert_eq!(config.settings.backend_timeout(), Duration::from_secs(5));
        assert_eq!(config.subscriptions.len(), 2);
        assert_eq!(config.scopes.children[0].children[0].level, ScopeLevel::Operation);
    }
}

#[test]
fn loads_toml_by_extension() {
    let file = write_file(
        ".toml",
        r#"
[[subscriptions]]
key = "k"
id = "contoso"

[backends.orders]
url = "https://orders.example.com"
timeout_secs = 3

[scopes]
id = "global"
level = "global"

[[scopes.inbound]]
kind = "validate-subscription"

[[scopes.children]]
id = "orders-api"
level = "api"
backend = "orders"

[[scopes.children.inbound]]
kind = "base"

[[scopes.children.inbound]]
kind = "rate-limit"
calls = 10
renewal_period_secs = 30
"#,
    );

    let config = GatewayConfig::load(file.path()).unwrap();
    let plans = PlanCompiler::new(&config).compile().unwrap();
    let plan = &plans["orders-api"];

    assert_eq!(plan.backend_timeout(), Duration::from_secs(3));
    let kinds: Vec<&str> = plan.inbound().iter().map(|p| p.step.kind()).collect();
    assert_eq!(kinds, ["validate-subscription", "rate-limit"]);
}

#[test]
fn rejects_unknown_extension() {
    let file = write_file(".json", "{}");
    let err = GatewayConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedFormat(ext) if ext == "json"));
}

#[test]
fn reports_missing_file() {
    let err = GatewayConfig::load("/nonexistent/apigate.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn reports_parse_errors() {
    let file = write_file(".yaml", "scopes: [not, a, scope]");
    let err = GatewayConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[tokio::test]
async fn certificate_credentials_load_from_pem_files() {
    let dir = TempDir::new().unwrap();
    let key_path = dir.path().join("key.pem");
    let cert_path = dir.path().join("cert.pem");
    std::fs::write(&key_path, SIGNING_KEY_PEM).unwrap();
    std::fs::write(&cert_path, SIGNING_CERT_PEM).unwrap();

    let yaml = format!(
        r"
credentials:
  orders-backend:
    token_endpoint: https://login.example.com/tenant/oauth2/v2.0/token
    client_id: gateway
    scope: api://orders/.default
    certificate:
      key_path: {}
      cert_path: {}
      algorithm: RS256
      assertion_lifetime_secs: 300
backends: {{ orders: {{ url: 'http://orders.local' }} }}
scopes: {{ id: global, level: global, backend: orders }}
",
        key_path.display(),
        cert_path.display()
    );

    let gateway = Gateway::from_config(GatewayConfig::from_yaml_str(&yaml).unwrap()).unwrap();
    let source = gateway.pipeline().tokens().source("orders-backend").unwrap();
    assert_eq!(source.cache_key(), "orders-backend|api://orders/.default");

    let form = source.form().unwrap();
    assert!(form
        .iter()
        .any(|(name, value)| *name == "client_assertion" && value.split('.').count() == 3));
}

#[tokio::test]
async fn unreadable_certificate_is_invalid_credential() {
    let config = GatewayConfig::from_yaml_str(
        r"
credentials:
  orders-backend:
    token_endpoint: https://login.example.com/token
    client_id: gateway
    scope: s
    certificate:
      key_path: /nonexistent/key.pem
      cert_path: /nonexistent/cert.pem
backends: { orders: { url: 'http://orders.local' } }
scopes: { id: global, level: global, backend: orders }
",
    )
    .unwrap();

    let err = Gateway::from_config(config).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidCredential { ref name, .. } if name == "orders-backend"));
}
