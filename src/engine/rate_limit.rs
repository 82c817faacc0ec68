//! Detection of server-side throttling.
//!
//! A rate-limited outcome is never retried automatically. The engine serves
//! the cached feed instead and raises `is_rate_limited` until the next
//! successful fetch.

use crate::error::SyncError;

/// Status codes the notification service uses to shed load.
const RATE_LIMIT_STATUSES: [u16; 2] = [429, 503];

/// Lowercase fragments of throttling messages seen in response bodies.
const THROTTLING_PHRASES: &[&str] = &[
    "too many requests",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "throttl",
    "quota exceeded",
    "slow down",
];

/// Whether `error` represents server-side rate limiting.
pub fn is_rate_limited(error: &SyncError) -> bool {
    match error {
        SyncError::RateLimited { .. } => true,
        SyncError::Server { status, message } => {
            RATE_LIMIT_STATUSES.contains(status) || mentions_throttling(message)
        }
        SyncError::Transport(message) => mentions_throttling(message),
        SyncError::MissingCredential | SyncError::Cancelled => false,
    }
}

/// Build the taxonomy variant for a non-2xx response.
pub fn classify_status(status: u16, message: String) -> SyncError {
    if RATE_LIMIT_STATUSES.contains(&status) || mentions_throttling(&message) {
        SyncError::RateLimited {
            status: Some(status),
            message,
        }
    } else {
        SyncError::Server { status, message }
    }
}

fn mentions_throttling(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    THROTTLING_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
}
