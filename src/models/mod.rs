//! Domain models for the notification feed.
//!
//! - [`Notification`]: one feed entry as served by the notification service.
//! - [`NotificationPatch`]: a partial update applied to cached entries by the
//!   optimistic mark-as-read operations.

mod notification;

pub use notification::*;
