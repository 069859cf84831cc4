use facegate_core::{MatchPolicy, DEFAULT_TOLERANCE};
use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite face database.
    pub db_path: PathBuf,
    /// Directory containing the SCRFD and ArcFace ONNX files.
    pub model_dir: PathBuf,
    /// Euclidean distance at or below which two faces match.
    pub match_tolerance: f64,
    pub match_policy: MatchPolicy,
    /// Capture timeout; `None` reads frames until the source ends.
    pub capture_timeout: Option<Duration>,
    /// Chatbot executable launched after verification.
    pub chat_bin: PathBuf,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facegate_core::default_model_dir());

        let db_path = std::env::var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facegate_store::default_db_path());

        let match_policy = match std::env::var("FACEGATE_MATCH_POLICY") {
            Ok(raw) => raw.parse().unwrap_or_else(|err| {
                tracing::warn!(%err, "falling back to first-match policy");
                MatchPolicy::First
            }),
            Err(_) => MatchPolicy::First,
        };

        Self {
            db_path,
            model_dir,
            match_tolerance: env_f64("FACEGATE_MATCH_TOLERANCE", DEFAULT_TOLERANCE),
            match_policy,
            capture_timeout: timeout_from_secs(env_u64("FACEGATE_CAPTURE_TIMEOUT_SECS", 0)),
            chat_bin: std::env::var("FACEGATE_CHAT_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_chat_bin()),
        }
    }
}

/// Zero means no timeout.
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// `facegate-chat` next to this executable, else whatever is on `PATH`.
fn default_chat_bin() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("facegate-chat")))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from("facegate-chat"))
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
