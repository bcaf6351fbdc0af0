pub mod cache;
pub mod critical;
pub mod forget;
pub mod relations;
pub mod resolve;
pub mod selftest;
pub mod stats;
pub mod store;
pub mod types;

/// Normalize a name for duplicate detection: trimmed, lowercased, inner
/// whitespace collapsed to single spaces.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Current time as RFC 3339 with fixed microsecond precision, so that stored
/// timestamps sort lexicographically.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
