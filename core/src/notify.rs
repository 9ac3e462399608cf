/// Unread notifications and window title text
use tracing::info;

/// Title shown when nothing is waiting
pub const IDLE_TITLE: &str = "Chat";

/// Platform-facing alert. The engine only decides when to call it.
pub trait NotificationSink: Send {
    fn notify(&mut self, count: u32, avatar: &str);
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&mut self, count: u32, avatar: &str) {
        info!("{} ({}) [icon: {}]", notification_title(count), NOTIFICATION_BODY, avatar);
    }
}

pub const NOTIFICATION_BODY: &str = "Click to view messages";

/// "You have 1 new message" / "You have 3 new messages"
pub fn notification_title(count: u32) -> String {
    if count == 1 {
        "You have 1 new message".to_string()
    } else {
        format!("You have {} new messages", count)
    }
}

/// Window title for the given unread total and visibility
pub fn window_title(total_unread: u32, visible: bool) -> String {
    if total_unread > 0 && visible {
        format!("You have {} unread messages", total_unread)
    } else {
        IDLE_TITLE.to_string()
    }
}

/// Whether an alert is due: something unread and nobody looking
pub fn should_notify(total_unread: u32, visible: bool) -> bool {
    total_unread > 0 && !visible
}
