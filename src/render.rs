//! Plain-text rendering of the cached feed for the CLI.

use crate::engine::{Snapshot, SyncStatus};
use crate::models::{Notification, Priority};

const UNREAD: char = '●';
const READ: char = '○';

fn read_symbol(notification: &Notification) -> char {
    if notification.read {
        READ
    } else {
        UNREAD
    }
}

fn priority_marker(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "!! ",
        Priority::Medium => "! ",
        Priority::Low => "",
    }
}

/// Render the feed as one entry per notification, last entry closing the
/// list.
///
/// Example output:
/// ```text
/// Notifications (1 unread)
/// ├── ● !! Daily limit reached [limit_reached]
/// │       You used all your lessons for today
/// └── ○ Weekly report [weekly_report]
///         3 lessons completed
/// ```
pub fn render_feed(snapshot: &Snapshot) -> String {
    let mut output = format!("Notifications ({} unread)", snapshot.unread_count());
    if snapshot.is_stale {
        output.push_str(" [stale]");
    }
    output.push('\n');

    if snapshot.is_empty() {
        output.push_str("└── (empty)\n");
        return output;
    }

    for (i, notification) in snapshot.notifications.iter().enumerate() {
        let is_last = i == snapshot.notifications.len() - 1;
        let (branch, continuation) = if is_last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };

        output.push_str(branch);
        output.push(read_symbol(notification));
        output.push(' ');
        output.push_str(priority_marker(notification.priority));
        output.push_str(&notification.title);
        output.push_str(&format!(" [{}]\n", notification.kind.as_str()));

        output.push_str(continuation);
        output.push_str("    ");
        output.push_str(&notification.message);
        output.push('\n');
    }
    output
}

/// One-line summary of the engine status.
pub fn render_status(status: &SyncStatus) -> String {
    let mut parts = vec![
        format!("loading={}", status.is_loading),
        format!("retries={}", status.retry_count),
        format!("rate_limited={}", status.is_rate_limited),
        format!("queued={}", status.queue_depth),
    ];
    if let Some(err) = &status.last_error {
        parts.push(format!("last_error={} ({})", err.kind(), err));
    }
    parts.join(" ")
}
