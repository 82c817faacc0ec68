use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a user's notification feed.
///
/// The engine treats everything except `id` and `read` as opaque display data.
/// Feed order is decided by the producer (most recent first) and is never
/// changed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Opaque identifier, unique within a feed.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<NotificationAction>,
}

/// What a notification is about.
///
/// Unknown values coming from the service collapse into `Generic`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    #[serde(alias = "progress-update")]
    ProgressUpdate,
    #[serde(alias = "limit-reached")]
    LimitReached,
    Achievement,
    #[serde(alias = "weekly-report")]
    WeeklyReport,
    Invitation,
    Reminder,
    Warning,
    #[serde(other)]
    Generic,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProgressUpdate => "progress_update",
            Self::LimitReached => "limit_reached",
            Self::Achievement => "achievement",
            Self::WeeklyReport => "weekly_report",
            Self::Invitation => "invitation",
            Self::Reminder => "reminder",
            Self::Warning => "warning",
            Self::Generic => "generic",
        }
    }
}

/// Display priority. Missing on the wire means `Low`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    #[default]
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Optional call-to-action attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub label: String,
    pub url: String,
}

/// Partial update applied to cached notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationPatch {
    pub read: Option<bool>,
}

impl NotificationPatch {
    /// Patch that flags a notification as read.
    pub fn mark_read() -> Self {
        Self { read: Some(true) }
    }

    /// Apply the patch in place. Returns true if any field changed.
    pub fn apply(&self, notification: &mut Notification) -> bool {
        let mut changed = false;
        if let Some(read) = self.read {
            changed |= notification.read != read;
            notification.read = read;
        }
        changed
    }
}
