use cs_domain::config::{Config, LogFormat, RecoveryMode};

#[test]
fn default_backend_is_local() {
    let config = Config::default();
    assert_eq!(config.backend.base_url, "http://127.0.0.1:8000");
    assert_eq!(config.backend.query_url(), "http://127.0.0.1:8000/query");
}

#[test]
fn empty_file_uses_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.conversation.id, "default");
    assert_eq!(config.conversation.settle_delay_ms, 300);
    assert!(config.conversation.persist);
    assert_eq!(config.decoder.recovery, RecoveryMode::Repair);
    assert_eq!(config.observability.log_format, LogFormat::Compact);
}

#[test]
fn backend_section_parses() {
    let toml_str = r#"
[backend]
base_url = "https://rag.example.com"
query_path = "/v1/query"
request_timeout_ms = 60000
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.backend.query_url(), "https://rag.example.com/v1/query");
    assert_eq!(config.backend.request_timeout_ms, Some(60_000));
    assert_eq!(config.backend.connect_timeout_ms, 10_000);
}

#[test]
fn strict_recovery_parses() {
    let toml_str = r#"
[decoder]
recovery = "strict"
max_frame_bytes = 4096
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.decoder.recovery, RecoveryMode::Strict);
    assert_eq!(config.decoder.max_frame_bytes, 4096);
}

#[test]
fn conversation_section_parses() {
    let toml_str = r#"
[conversation]
id = "support-desk"
settle_delay_ms = 0
persist = false
history_dir = "/tmp/cs"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.conversation.id, "support-desk");
    assert_eq!(config.conversation.settle_delay_ms, 0);
    assert!(!config.conversation.persist);
    assert_eq!(config.conversation.history_dir.to_str(), Some("/tmp/cs"));
}

#[test]
fn json_log_format_parses() {
    let toml_str = r#"
[observability]
log_format = "json"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.observability.log_format, LogFormat::Json);
    assert_eq!(config.observability.default_filter, "warn");
}
