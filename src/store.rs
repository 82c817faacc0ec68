//! In-memory feed storage for the reference notification service.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::models::{Notification, NotificationAction, NotificationType, Priority};

/// Shared, cloneable notification feed. Most recent entries first.
#[derive(Clone, Default)]
pub struct NotificationStore {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifications(notifications: Vec<Notification>) -> Self {
        Self {
            notifications: Arc::new(Mutex::new(notifications)),
        }
    }

    /// Store pre-filled with `count` demo notifications cycling through every
    /// notification type, newest first.
    pub fn seeded(count: usize) -> Self {
        const KINDS: [NotificationType; 8] = [
            NotificationType::ProgressUpdate,
            NotificationType::LimitReached,
            NotificationType::Achievement,
            NotificationType::WeeklyReport,
            NotificationType::Invitation,
            NotificationType::Reminder,
            NotificationType::Warning,
            NotificationType::Generic,
        ];

        let now = Utc::now();
        let notifications = (0..count)
            .map(|i| {
                let kind = KINDS[i % KINDS.len()];
                let priority = match kind {
                    NotificationType::LimitReached | NotificationType::Warning => Priority::High,
                    NotificationType::Invitation | NotificationType::Reminder => Priority::Medium,
                    _ => Priority::Low,
                };
                let minutes = i64::try_from(i).unwrap_or(i64::MAX);
                Notification {
                    id: Uuid::new_v4().to_string(),
                    kind,
                    title: format!("{} #{}", kind.as_str().replace('_', " "), i + 1),
                    message: format!("Demo {} notification", kind.as_str()),
                    timestamp: now - Duration::minutes(minutes),
                    read: false,
                    priority,
                    avatar: None,
                    action: (kind == NotificationType::Invitation).then(|| NotificationAction {
                        label: "Accept".to_string(),
                        url: "/invitations".to_string(),
                    }),
                }
            })
            .collect();
        Self::with_notifications(notifications)
    }

    pub fn list(&self) -> Vec<Notification> {
        self.notifications.lock().expect("store lock poisoned").clone()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.notifications
            .lock()
            .expect("store lock poisoned")
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }

    /// Add a notification at the top of the feed.
    pub fn push(&self, notification: Notification) {
        self.notifications
            .lock()
            .expect("store lock poisoned")
            .insert(0, notification);
    }

    /// Flag a notification as read. Returns false if it does not exist.
    pub fn mark_read(&self, id: &str) -> bool {
        let mut notifications = self.notifications.lock().expect("store lock poisoned");
        match notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        }
    }
}
