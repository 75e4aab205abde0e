use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Apply environment overrides (`CS_BACKEND_URL`).
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("CS_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.backend.base_url = url.trim().to_string();
            }
        }
    }

    /// Basic sanity checks.  Returns one message per problem found.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.backend.base_url.starts_with("http://")
            && !self.backend.base_url.starts_with("https://")
        {
            problems.push(format!(
                "backend.base_url must start with http:// or https:// (got {:?})",
                self.backend.base_url
            ));
        }
        if !self.backend.query_path.starts_with('/') {
            problems.push("backend.query_path must start with '/'".into());
        }
        if self.conversation.id.trim().is_empty() {
            problems.push("conversation.id must not be empty".into());
        }
        if self.decoder.max_frame_bytes == 0 {
            problems.push("decoder.max_frame_bytes must be greater than zero".into());
        }
        problems
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_query_path")]
    pub query_path: String,
    #[serde(default = "d_10000")]
    pub connect_timeout_ms: u64,
    /// Whole-request timeout, including streaming the body.  `None` leaves
    /// the stream open for as long as the backend keeps it open.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default = "d_user_agent")]
    pub user_agent: String,
}

impl BackendConfig {
    /// Full URL of the streaming query endpoint.
    pub fn query_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.query_path
        )
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            query_path: d_query_path(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: None,
            user_agent: d_user_agent(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Process-scoped key the history is stored under.
    #[serde(default = "d_conversation_id")]
    pub id: String,
    /// Pause between the terminal frame and clearing the progress list, so
    /// the last step can be seen as completed.
    #[serde(default = "d_300")]
    pub settle_delay_ms: u64,
    #[serde(default = "d_history_dir")]
    pub history_dir: PathBuf,
    /// When false, history lives in memory only.
    #[serde(default = "d_true")]
    pub persist: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            id: d_conversation_id(),
            settle_delay_ms: 300,
            history_dir: d_history_dir(),
            persist: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frame decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Upper bound on an unterminated frame held in the decode buffer.
    #[serde(default = "d_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default)]
    pub recovery: RecoveryMode,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: d_max_frame_bytes(),
            recovery: RecoveryMode::Repair,
        }
    }
}

/// How frames that fail strict JSON parsing are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Run the bounded repair strategies before giving up on a frame.
    #[default]
    Repair,
    /// Never repair: a frame must parse as-is and end with `}`.
    Strict,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "d_filter")]
    pub default_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Compact,
            default_filter: d_filter(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

// ── Serde default helpers ────────────────────────────────────────────

fn d_base_url() -> String {
    "http://127.0.0.1:8000".into()
}
fn d_query_path() -> String {
    "/query".into()
}
fn d_user_agent() -> String {
    concat!("casestream/", env!("CARGO_PKG_VERSION")).into()
}
fn d_conversation_id() -> String {
    "default".into()
}
fn d_history_dir() -> PathBuf {
    PathBuf::from("./data/history")
}
fn d_filter() -> String {
    "warn".into()
}
fn d_max_frame_bytes() -> usize {
    8 * 1024 * 1024
}
fn d_10000() -> u64 {
    10_000
}
fn d_300() -> u64 {
    300
}
fn d_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_url_joins_without_double_slash() {
        let cfg = BackendConfig {
            base_url: "https://rag.example.com/".into(),
            ..BackendConfig::default()
        };
        assert_eq!(cfg.query_url(), "https://rag.example.com/query");
    }

    #[test]
    fn validate_flags_bad_url_and_path() {
        let mut cfg = Config::default();
        cfg.backend.base_url = "localhost:8000".into();
        cfg.backend.query_path = "query".into();
        let problems = cfg.validate();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_empty());
    }
}
