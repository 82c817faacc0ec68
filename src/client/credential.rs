//! Bearer credential lookup.
//!
//! Token acquisition belongs to the host application. The engine only asks,
//! synchronously, for the current token right before a request needs it.

/// Source of the bearer token sent to the notification service.
pub trait CredentialSource: Send + Sync {
    /// Current token, or `None` when the session has none.
    fn credential(&self) -> Option<String>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn credential(&self) -> Option<String> {
        self()
    }
}

/// Fixed token, for the CLI and tests.
#[derive(Debug, Clone)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialSource for StaticCredential {
    fn credential(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Token read from an environment variable on every lookup.
#[derive(Debug, Clone)]
pub struct EnvCredential {
    key: String,
}

impl EnvCredential {
    pub const DEFAULT_KEY: &'static str = "NOTIFY_SYNC_TOKEN";

    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for EnvCredential {
    fn default() -> Self {
        Self::new(Self::DEFAULT_KEY)
    }
}

impl CredentialSource for EnvCredential {
    fn credential(&self) -> Option<String> {
        std::env::var(&self.key).ok()
    }
}
