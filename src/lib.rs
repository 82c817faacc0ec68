//! Notification feed synchronization.
//!
//! Fetches a user's notification feed from a remote service, caches it,
//! throttles and coalesces outbound requests, retries failures with backoff,
//! detects server-side rate limiting, and applies optimistic mark-as-read
//! updates locally whatever the network says.
//!
//! Start from [`NotificationEngine`]. The [`api`] module contains a small
//! reference implementation of the notification service.

pub mod api;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod render;
pub mod store;

pub use client::{CredentialSource, HttpNotificationApi, NotificationApi, StaticCredential};
pub use config::EngineConfig;
pub use engine::{BatchReport, NotificationEngine, Snapshot, SyncStatus};
pub use error::SyncError;
