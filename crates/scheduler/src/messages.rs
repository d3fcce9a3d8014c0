//! Wording of the scheduler's notices.

use chronos_calendar::types::{Event, NotificationKind, User};

use crate::sink::Notice;

fn notice(recipient: User, event: &Event, title: String, message: String) -> Notice {
    Notice {
        recipient,
        title,
        message,
        kind: NotificationKind::EventReminder,
        event_id: Some(event.id.clone()),
    }
}

pub fn started(recipient: User, event: &Event) -> Notice {
    let mut message = format!("Event \"{}\" starts right now.", event.title);
    if let Some(description) = event.description.as_deref().filter(|d| !d.is_empty()) {
        message.push('\n');
        message.push_str(description);
    }
    notice(
        recipient,
        event,
        format!("Event started: {}", event.title),
        message,
    )
}

pub fn ended(recipient: User, event: &Event) -> Notice {
    notice(
        recipient,
        event,
        format!("Event ended: {}", event.title),
        format!("Event \"{}\" ends right now.", event.title),
    )
}

/// Sent after a recurring event was moved to its next occurrence.
pub fn occurs_again(recipient: User, event: &Event) -> Notice {
    notice(
        recipient,
        event,
        format!("Event ended: {}", event.title),
        format!(
            "Event \"{}\" occurs again {}, next on {}.",
            event.title,
            event.recurrence,
            event.start_time.format("%Y-%m-%d %H:%M UTC")
        ),
    )
}
