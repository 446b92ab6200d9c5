//! # Response Classifier
//!
//! Maps a raw probe outcome (HTTP status plus optional body) onto the
//! monitor's failure taxonomy. Rules apply in priority order:
//!
//! 1. 2xx → healthy
//! 2. 429 / 402 → quota
//! 3. 401 / 403 → auth
//! 4. ≥ 500 → server
//! 5. any other status: an error message containing a quota keyword → quota,
//!    otherwise client-other
//! 6. no status at all (transport fault) → network
//!
//! Quota is preferred whenever the evidence is ambiguous. Quota exhaustion
//! is routine with finite credential pools and heals through rotation, so a
//! missed escalation costs far less than a false critical alert.

use crate::probe::ErrorKind;
use serde_json::Value;

/// Substrings that mark an error message as quota or billing related.
/// Matched case-insensitively.
pub const QUOTA_KEYWORDS: &[&str] = &[
    "quota",
    "limit",
    "rate",
    "insufficient",
    "exceeded",
    "billing",
    "payment",
    "credits",
    "balance",
    "usage",
];

/// Top-level JSON fields that may carry an error message, in lookup order.
const MESSAGE_FIELDS: &[&str] = &["error", "message", "detail", "error_description"];

/// Classify one probe outcome.
pub fn classify(status: Option<u16>, body: Option<&str>) -> ErrorKind {
    let Some(status) = status else {
        return ErrorKind::Network;
    };

    match status {
        200..=299 => ErrorKind::None,
        429 | 402 => ErrorKind::Quota,
        401 | 403 => ErrorKind::Auth,
        s if s >= 500 => ErrorKind::Server,
        _ => match body.and_then(extract_error_message) {
            Some(message) if mentions_quota(&message) => ErrorKind::Quota,
            _ => ErrorKind::ClientOther,
        },
    }
}

/// True when `message` contains any of [`QUOTA_KEYWORDS`].
pub fn mentions_quota(message: &str) -> bool {
    let lowered = message.to_lowercase();
    QUOTA_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

/// Pull a human-readable error message out of a response body.
///
/// JSON bodies are searched for `error` (as a string or an object with a
/// `message`), `message`, `detail` and `error_description`. Bodies that are
/// not JSON are returned trimmed, if non-empty.
pub fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(json) = serde_json::from_str::<Value>(trimmed) else {
        return Some(truncate(trimmed));
    };

    for field in MESSAGE_FIELDS {
        match json.get(field) {
            Some(Value::String(message)) if !message.trim().is_empty() => {
                return Some(truncate(message.trim()));
            }
            Some(Value::Object(inner)) => {
                if let Some(Value::String(message)) = inner.get("message") {
                    return Some(truncate(message.trim()));
                }
            }
            _ => {}
        }
    }

    None
}

fn truncate(message: &str) -> String {
    const MAX_CHARS: usize = 500;
    if message.chars().count() <= MAX_CHARS {
        message.to_string()
    } else {
        let mut cut: String = message.chars().take(MAX_CHARS).collect();
        cut.push('…');
        cut
    }
}
