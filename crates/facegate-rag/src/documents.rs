//! Registration records rendered as retrievable sentences.

use chrono::{DateTime, NaiveDateTime};
use facegate_store::RegisteredUser;

const DISPLAY_FORMAT: &str = "%B %d, %Y at %I:%M %p";

/// Render a stored ISO-8601 timestamp as e.g. `May 01, 2024 at 02:05 PM`.
///
/// Unparseable input is returned unchanged.
pub fn format_timestamp(iso: &str) -> String {
    if let Ok(naive) = iso.parse::<NaiveDateTime>() {
        return naive.format(DISPLAY_FORMAT).to_string();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(iso) {
        return dt.naive_local().format(DISPLAY_FORMAT).to_string();
    }
    tracing::debug!(timestamp = iso, "unrecognized timestamp; using raw value");
    iso.to_string()
}

pub fn registration_document(user: &RegisteredUser) -> String {
    format!("{} was registered at {}", user.name, format_timestamp(&user.registered_at))
}

pub fn registration_documents(users: &[RegisteredUser]) -> Vec<String> {
    users.iter().map(registration_document).collect()
}
