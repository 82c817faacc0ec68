//! Error taxonomy observed by callers of the sync engine.

use thiserror::Error;

/// Failure of a single engine operation.
///
/// Variants carry owned strings rather than transport errors so a copy can
/// live in the watched [`SyncStatus`](crate::engine::SyncStatus).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// No bearer credential was available. Raised before dispatch.
    #[error("No credential available for the notification service")]
    MissingCredential,

    /// The service asked us to slow down (429/503 or throttling phrasing).
    #[error("Rate limited: {message}")]
    RateLimited { status: Option<u16>, message: String },

    /// Network-level failure, including per-request timeouts.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Non-2xx response that is not a rate-limit signal.
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// A queued request was dropped by `clear_queue` before dispatch.
    #[error("Request cancelled before dispatch")]
    Cancelled,
}

impl SyncError {
    /// Stable kebab-case name of the variant, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing-credential",
            Self::RateLimited { .. } => "rate-limited",
            Self::Transport(_) => "transport",
            Self::Server { .. } => "server",
            Self::Cancelled => "cancelled",
        }
    }

    /// HTTP status attached to the failure, if the service answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { status, .. } => *status,
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}
