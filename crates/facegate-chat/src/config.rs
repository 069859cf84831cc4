use facegate_rag::{DEFAULT_MAX_TOKENS, DEFAULT_TOP_K};
use std::path::PathBuf;

const DEFAULT_LLM_MODEL: &str = "claude-3-5-haiku-latest";

/// Chatbot configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Face database shared with the `facegate` CLI.
    pub db_path: PathBuf,
    /// Directory with the all-MiniLM-L6-v2 `tokenizer.json` and ONNX export.
    pub text_model_dir: PathBuf,
    pub llm_model: String,
    /// Upper bound on answer length, in tokens.
    pub max_answer_tokens: u64,
    /// Documents retrieved per registration question.
    pub retrieval_k: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("FACEGATE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| facegate_store::default_db_path()),
            text_model_dir: std::env::var("FACEGATE_TEXT_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| facegate_core::default_model_dir().join("all-MiniLM-L6-v2")),
            llm_model: std::env::var("FACEGATE_LLM_MODEL")
                .unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            max_answer_tokens: env_parse("FACEGATE_MAX_ANSWER_TOKENS", DEFAULT_MAX_TOKENS),
            retrieval_k: env_parse("FACEGATE_RETRIEVAL_K", DEFAULT_TOP_K),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
