//! Cached notification feed.
//!
//! The store is a [`watch`] channel around a [`Snapshot`]: reads clone the
//! current value, writes modify it in place and wake every subscriber. Only
//! successful fetches replace the collection; optimistic mutations patch it.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::models::{Notification, NotificationPatch};

/// Window during which a fetched feed is served without a network round trip.
pub const DEFAULT_FRESH_WINDOW: Duration = Duration::from_secs(30);

/// Point-in-time view of the cached feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub notifications: Vec<Notification>,
    /// Wall-clock time of the last successful fetch.
    pub last_fetch_at: Option<DateTime<Utc>>,
    /// Set by explicit invalidation, cleared by the next successful fetch.
    pub is_stale: bool,
    pub(crate) fetched: Option<Instant>,
}

impl Snapshot {
    /// Fresh means fetched less than `window` ago and not invalidated.
    pub fn is_fresh(&self, window: Duration) -> bool {
        !self.is_stale && self.fetched.is_some_and(|at| at.elapsed() < window)
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == id)
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

/// Owner of the cached feed.
#[derive(Debug)]
pub struct CacheStore {
    tx: watch::Sender<Snapshot>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    /// Create an empty, never-fetched cache.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::default());
        Self { tx }
    }

    pub fn read(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    /// Receiver woken on every change to the cached feed.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    pub fn is_fresh(&self, window: Duration) -> bool {
        self.tx.borrow().is_fresh(window)
    }

    /// Overwrite the feed with a fetch result and clear the stale flag.
    ///
    /// Later duplicates of an id are dropped; the first occurrence keeps its
    /// position.
    pub fn replace(&self, notifications: Vec<Notification>, fetched_at: DateTime<Utc>) {
        let mut seen = HashSet::with_capacity(notifications.len());
        let received = notifications.len();
        let notifications: Vec<_> = notifications
            .into_iter()
            .filter(|n| seen.insert(n.id.clone()))
            .collect();
        if notifications.len() != received {
            tracing::warn!(
                received,
                kept = notifications.len(),
                "dropped duplicate notification ids from feed"
            );
        }

        self.tx.send_modify(|snapshot| {
            snapshot.notifications = notifications;
            snapshot.last_fetch_at = Some(fetched_at);
            snapshot.fetched = Some(Instant::now());
            snapshot.is_stale = false;
        });
    }

    /// Mark the feed stale without discarding it.
    pub fn invalidate(&self) {
        self.tx.send_if_modified(|snapshot| {
            let was_stale = snapshot.is_stale;
            snapshot.is_stale = true;
            !was_stale
        });
    }

    /// Patch one notification. Returns false if `id` is not cached.
    pub fn mutate_one(&self, id: &str, patch: NotificationPatch) -> bool {
        let mut found = false;
        self.tx.send_if_modified(|snapshot| {
            match snapshot.notifications.iter_mut().find(|n| n.id == id) {
                Some(notification) => {
                    found = true;
                    patch.apply(notification)
                }
                None => false,
            }
        });
        found
    }

    /// Patch every notification. Returns how many changed.
    pub fn mutate_all(&self, patch: NotificationPatch) -> usize {
        let mut changed = 0;
        self.tx.send_if_modified(|snapshot| {
            changed = snapshot
                .notifications
                .iter_mut()
                .map(|n| patch.apply(n))
                .filter(|c| *c)
                .count();
            changed > 0
        });
        changed
    }

    /// Ids of cached notifications not yet read, in feed order.
    pub fn unread_ids(&self) -> Vec<String> {
        self.tx
            .borrow()
            .notifications
            .iter()
            .filter(|n| !n.read)
            .map(|n| n.id.clone())
            .collect()
    }
}
