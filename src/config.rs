//! Engine configuration.
//!
//! Every knob defaults to the literal used by the web client. Values can be
//! overridden from the environment:
//! - `NOTIFY_SYNC_URL` - Base URL (default: `http://localhost:17020/api/v1`)
//! - `NOTIFY_SYNC_MIN_INTERVAL_MS` - spacing between dispatched requests
//! - `NOTIFY_SYNC_FRESH_WINDOW_MS` - how long a fetched feed counts as fresh
//! - `NOTIFY_SYNC_BATCH_SIZE` / `NOTIFY_SYNC_BATCH_PACING_MS` - bulk mark-as-read pacing
//! - `NOTIFY_SYNC_FETCH_TIMEOUT_MS` / `NOTIFY_SYNC_MARK_TIMEOUT_MS` - per-call timeouts

use std::time::Duration;

use crate::engine::batch::{DEFAULT_BATCH_PACING, DEFAULT_BATCH_SIZE};
use crate::engine::cache::DEFAULT_FRESH_WINDOW;
use crate::engine::retry::RetryPolicy;
use crate::engine::throttle::DEFAULT_MIN_INTERVAL;

/// Default URL for local development.
pub const DEFAULT_URL: &str = "http://localhost:17020/api/v1";

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MARK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Base URL of the notification service, without trailing slash.
    pub base_url: String,
    pub min_interval: Duration,
    pub fresh_window: Duration,
    pub retry: RetryPolicy,
    pub batch_size: usize,
    pub batch_pacing: Duration,
    pub fetch_timeout: Duration,
    pub mark_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_URL.to_string(),
            min_interval: DEFAULT_MIN_INTERVAL,
            fresh_window: DEFAULT_FRESH_WINDOW,
            retry: RetryPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pacing: DEFAULT_BATCH_PACING,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            mark_timeout: DEFAULT_MARK_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("NOTIFY_SYNC_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            min_interval: env_millis("NOTIFY_SYNC_MIN_INTERVAL_MS").unwrap_or(defaults.min_interval),
            fresh_window: env_millis("NOTIFY_SYNC_FRESH_WINDOW_MS").unwrap_or(defaults.fresh_window),
            retry: defaults.retry,
            batch_size: std::env::var("NOTIFY_SYNC_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|size| *size > 0)
                .unwrap_or(defaults.batch_size),
            batch_pacing: env_millis("NOTIFY_SYNC_BATCH_PACING_MS").unwrap_or(defaults.batch_pacing),
            fetch_timeout: env_millis("NOTIFY_SYNC_FETCH_TIMEOUT_MS").unwrap_or(defaults.fetch_timeout),
            mark_timeout: env_millis("NOTIFY_SYNC_MARK_TIMEOUT_MS").unwrap_or(defaults.mark_timeout),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn with_fresh_window(mut self, fresh_window: Duration) -> Self {
        self.fresh_window = fresh_window;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batching(mut self, batch_size: usize, pacing: Duration) -> Self {
        self.batch_size = batch_size;
        self.batch_pacing = pacing;
        self
    }

    pub fn with_timeouts(mut self, fetch: Duration, mark: Duration) -> Self {
        self.fetch_timeout = fetch;
        self.mark_timeout = mark;
        self
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}
