//! Notification synchronization engine.
//!
//! [`NotificationEngine`] is the only entry point for UI collaborators. It
//! owns one [`CacheStore`] and one [`Throttle`] per authenticated session and
//! combines them with the retry schedule and rate-limit detection:
//!
//! ```text
//! fetch / mark_one ──► Throttle ──► NotificationApi
//!                         │               │
//!                         │      rate_limit + retry
//!                         ▼               ▼
//!                      CacheStore ◄── replace / patch ──► watch subscribers
//! ```
//!
//! Failures degrade to the last good cache; errors are surfaced only through
//! [`SyncStatus`] unless local recovery is impossible.

pub mod batch;
pub mod cache;
pub mod rate_limit;
pub mod retry;
pub mod throttle;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

pub use cache::{CacheStore, Snapshot};
pub use retry::{RetryPolicy, RetryState};
pub use throttle::{Submission, Throttle};

use crate::client::{CredentialSource, EnvCredential, HttpNotificationApi, NotificationApi};
use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::models::NotificationPatch;

/// Observable state of the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// At least one fetch lineage is running.
    pub is_loading: bool,
    /// Most recent failure, cleared by a successful fetch.
    pub last_error: Option<SyncError>,
    /// Retries consumed by the current or last fetch lineage.
    pub retry_count: u32,
    /// The service signalled throttling; cleared by a successful fetch.
    pub is_rate_limited: bool,
    /// Requests waiting in the throttle queue.
    pub queue_depth: usize,
}

/// Outcome of a bulk mark-as-read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Unread notifications the batch covered.
    pub attempted: usize,
    /// Acknowledged by the service.
    pub acknowledged: usize,
    /// Skipped because a request for the same id was already in flight.
    pub coalesced: usize,
    /// Remote failures, by notification id. The local update still applied.
    pub failed: Vec<(String, SyncError)>,
}

struct EngineInner {
    api: Arc<dyn NotificationApi>,
    credentials: Arc<dyn CredentialSource>,
    config: EngineConfig,
    cache: CacheStore,
    throttle: Throttle,
    status: Arc<watch::Sender<SyncStatus>>,
    /// Fetch lineages currently running; only changed inside a status update.
    active_fetches: AtomicUsize,
}

/// Cloneable handle to one engine instance.
#[derive(Clone)]
pub struct NotificationEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for NotificationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationEngine")
            .field("config", &self.inner.config)
            .field("throttle", &self.inner.throttle)
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl NotificationEngine {
    pub fn new(
        api: impl NotificationApi + 'static,
        credentials: impl CredentialSource + 'static,
        config: EngineConfig,
    ) -> Self {
        let (status, _rx) = watch::channel(SyncStatus::default());
        let status = Arc::new(status);

        let depth_status = Arc::clone(&status);
        let throttle = Throttle::with_depth_hook(config.min_interval, move |depth| {
            depth_status.send_if_modified(|s| {
                let changed = s.queue_depth != depth;
                s.queue_depth = depth;
                changed
            });
        });

        Self {
            inner: Arc::new(EngineInner {
                api: Arc::new(api),
                credentials: Arc::new(credentials),
                config,
                cache: CacheStore::new(),
                throttle,
                status,
                active_fetches: AtomicUsize::new(0),
            }),
        }
    }

    /// Engine talking HTTP to the service configured in the environment,
    /// with the token read from `NOTIFY_SYNC_TOKEN`.
    pub fn from_env() -> Self {
        let config = EngineConfig::from_env();
        Self::new(
            HttpNotificationApi::from_config(&config),
            EnvCredential::default(),
            config,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Current cached feed. Never blocks on the network.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.cache.read()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.cache.read().unread_count()
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Snapshot> {
        self.inner.cache.subscribe()
    }

    /// Mark the cache stale so the next `fetch(false)` goes to the network.
    pub fn invalidate(&self) {
        tracing::debug!("notification cache invalidated");
        self.inner.cache.invalidate();
    }

    /// Cancel every queued request. Returns how many were dropped.
    pub fn clear_queue(&self) -> usize {
        self.inner.throttle.clear_queue()
    }

    /// Refresh the feed.
    ///
    /// Serves the cache without a request while it is fresh, unless `force`.
    /// Transport and server failures are retried on the configured schedule;
    /// rate-limited failures are not. Either way the returned snapshot is the
    /// best data available and [`SyncStatus`] describes what went wrong.
    ///
    /// Errors only with [`SyncError::MissingCredential`] (nothing was sent)
    /// or [`SyncError::Cancelled`] (the queue was cleared under us).
    pub async fn fetch(&self, force: bool) -> Result<Snapshot, SyncError> {
        let inner = &self.inner;
        if !force && inner.cache.is_fresh(inner.config.fresh_window) {
            tracing::debug!("notification cache fresh, skipping fetch");
            return Ok(inner.cache.read());
        }

        let token = self.credential()?;
        let _loading = LoadingGuard::enter(self);

        let mut retry = RetryState::default();
        let outcome = loop {
            let api = Arc::clone(&inner.api);
            let token = token.clone();
            let submitted = inner
                .throttle
                .submit(None, move || async move { api.fetch_notifications(&token).await })
                .await;

            match submitted {
                Ok(Submission::Dispatched(notifications)) => {
                    tracing::info!(count = notifications.len(), "notification feed fetched");
                    inner.cache.replace(notifications, Utc::now());
                    self.update_status(|s| {
                        s.last_error = None;
                        s.is_rate_limited = false;
                        s.retry_count = 0;
                    });
                    break Ok(());
                }
                Ok(Submission::Coalesced) => break Ok(()),
                Err(SyncError::Cancelled) => {
                    tracing::debug!("queued fetch cancelled");
                    break Err(SyncError::Cancelled);
                }
                Err(err) if rate_limit::is_rate_limited(&err) => {
                    tracing::warn!(error = %err, "notification service rate limited, serving cached feed");
                    self.update_status(|s| {
                        s.is_rate_limited = true;
                        s.last_error = Some(err);
                    });
                    break Ok(());
                }
                Err(err) => match retry.record_failure(&inner.config.retry) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt = retry.attempt(),
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "notification fetch failed, retrying"
                        );
                        self.update_status(|s| {
                            s.retry_count = retry.attempt();
                            s.last_error = Some(err);
                        });
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(
                            attempts = retry.attempt(),
                            error = %err,
                            "notification fetch failed after retries, serving cached feed"
                        );
                        self.update_status(|s| s.last_error = Some(err));
                        break Ok(());
                    }
                },
            }
        };

        outcome.map(|()| inner.cache.read())
    }

    /// Mark one notification as read.
    ///
    /// The local update is applied whatever the service answers and is never
    /// rolled back. A concurrent call for the same id is coalesced into the
    /// request already in flight. The returned error, if any, describes the
    /// remote acknowledgment only.
    pub async fn mark_one(&self, id: &str) -> Result<Snapshot, SyncError> {
        let inner = &self.inner;
        let token = self.credential()?;

        let api = Arc::clone(&inner.api);
        let remote_id = id.to_owned();
        let outcome = inner
            .throttle
            .submit(Some(id), move || async move { api.mark_read(&remote_id, &token).await })
            .await;

        if !inner.cache.mutate_one(id, NotificationPatch::mark_read()) {
            tracing::debug!(id, "marked notification not present in cache");
        }

        match outcome {
            Ok(Submission::Dispatched(())) => {
                tracing::debug!(id, "notification acknowledged as read");
                Ok(inner.cache.read())
            }
            Ok(Submission::Coalesced) => Ok(inner.cache.read()),
            Err(err) => {
                self.record_remote_failure(&err);
                tracing::warn!(id, error = %err, "mark-as-read not acknowledged, keeping local state");
                Err(err)
            }
        }
    }

    /// Mark every cached unread notification as read.
    ///
    /// Acknowledgments go out in paced batches. Once every batch has settled
    /// the whole cache is marked read, regardless of per-item failures.
    pub async fn mark_all(&self) -> Result<BatchReport, SyncError> {
        let inner = &self.inner;
        let token = self.credential()?;

        let unread = inner.cache.unread_ids();
        if unread.is_empty() {
            return Ok(BatchReport::default());
        }

        let mut report = BatchReport {
            attempted: unread.len(),
            ..BatchReport::default()
        };
        tracing::info!(count = unread.len(), "marking all notifications as read");

        let outcomes = batch::run_in_batches(
            unread,
            inner.config.batch_size,
            inner.config.batch_pacing,
            |id| {
                let api = Arc::clone(&inner.api);
                let throttle = inner.throttle.clone();
                let token = token.clone();
                async move {
                    let outcome = throttle
                        .run_coalesced(&id, || api.mark_read(&id, &token))
                        .await;
                    (id, outcome)
                }
            },
        )
        .await;

        for (id, outcome) in outcomes {
            match outcome {
                Ok(Submission::Dispatched(())) => report.acknowledged += 1,
                Ok(Submission::Coalesced) => report.coalesced += 1,
                Err(err) => {
                    self.record_remote_failure(&err);
                    report.failed.push((id, err));
                }
            }
        }

        inner.cache.mutate_all(NotificationPatch::mark_read());
        if !report.failed.is_empty() {
            tracing::warn!(
                failed = report.failed.len(),
                attempted = report.attempted,
                "some mark-as-read acknowledgments failed, keeping local state"
            );
        }
        Ok(report)
    }

    fn credential(&self) -> Result<String, SyncError> {
        match self.inner.credentials.credential() {
            Some(token) if !token.is_empty() => Ok(token),
            _ => {
                tracing::warn!("no credential available, request not sent");
                self.update_status(|s| s.last_error = Some(SyncError::MissingCredential));
                Err(SyncError::MissingCredential)
            }
        }
    }

    fn record_remote_failure(&self, err: &SyncError) {
        let rate_limited = rate_limit::is_rate_limited(err);
        self.update_status(|s| {
            s.is_rate_limited |= rate_limited;
            s.last_error = Some(err.clone());
        });
    }

    fn update_status(&self, update: impl FnOnce(&mut SyncStatus)) {
        self.inner.status.send_modify(update);
    }
}

/// Holds `is_loading` up for one fetch lineage, including one whose future
/// is dropped mid-flight.
struct LoadingGuard<'a> {
    engine: &'a NotificationEngine,
}

impl<'a> LoadingGuard<'a> {
    fn enter(engine: &'a NotificationEngine) -> Self {
        let active = &engine.inner.active_fetches;
        engine.update_status(|s| {
            active.fetch_add(1, Ordering::SeqCst);
            s.is_loading = true;
            s.retry_count = 0;
        });
        Self { engine }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let active = &self.engine.inner.active_fetches;
        self.engine.update_status(|s| {
            let remaining = active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            s.is_loading = remaining > 0;
        });
    }
}
