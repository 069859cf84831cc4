//! Keyword routing between registration questions and general ones.

use serde::Serialize;

/// Substrings that mark a question as being about registered users.
pub const REGISTRATION_KEYWORDS: [&str; 7] =
    ["who", "registered", "how many", "when", "time", "name", "person"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Answer from retrieved registration records.
    Registration,
    /// Answer from the model alone.
    General,
}

/// Case-insensitive substring match against [`REGISTRATION_KEYWORDS`].
///
/// A heuristic: "sometimes" matches "time", for one.
pub fn route(question: &str) -> Intent {
    let lower = question.to_lowercase();
    if REGISTRATION_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        Intent::Registration
    } else {
        Intent::General
    }
}

pub fn registration_prompt(context: &[&str], question: &str) -> String {
    format!("Context:\n{}\n\nQuestion: {question}\nAnswer:", context.join("\n"))
}

pub fn general_prompt(question: &str) -> String {
    format!("Answer the following general question clearly:\n\n{question}")
}
