//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in seconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Keys and Tokens
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the cache key for a stream URL: MD5 hex of the trimmed URL.
#[must_use]
pub fn cache_key(stream_url: &str) -> String {
    format!("{:x}", md5::compute(stream_url.trim().as_bytes()))
}

/// Compares two secrets without short-circuiting on the first differing byte.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Generates a random 32-character hex token.
#[must_use]
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Percent-encodes a URL for use as a query parameter value.
#[must_use]
pub fn encode_query_value(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
