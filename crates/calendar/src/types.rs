//! Core data types: users, calendars, memberships, events, tags, notifications.

use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, SubsecRound, Utc},
    serde::{Deserialize, Serialize},
};

use crate::error::Error;

chronos_common::define_id!(
    /// Identifies a user. Issued by the identity subsystem.
    UserId
);
chronos_common::define_id!(
    /// Identifies a calendar.
    CalendarId
);
chronos_common::define_id!(
    /// Identifies an event.
    EventId
);
chronos_common::define_id!(
    /// Identifies a tag.
    TagId
);
chronos_common::define_id!(
    /// Identifies an in-app notification.
    NotificationId
);

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum from a
/// table of `Variant => "wire-name"` pairs.
macro_rules! string_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(Error::bad_request(format!(
                        concat!("unknown ", $label, ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

/// Current time at the millisecond precision the stores keep.
#[must_use]
pub fn now_ms() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

// ── Roles ───────────────────────────────────────────────────────────────────

/// A member's role in a calendar.
///
/// Variants are declared lowest first, so the derived `Ord` is the permission
/// order `visitor < editor < admin < owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Can see events.
    Visitor,
    /// Can also create and edit events and tags.
    Editor,
    /// Can also edit the calendar and manage members.
    Admin,
    /// Can also transfer ownership. Exactly one per calendar.
    Owner,
}

string_enum!(Role, "role", {
    Visitor => "visitor",
    Editor => "editor",
    Admin => "admin",
    Owner => "owner",
});

impl Role {
    pub const ALL: [Self; 4] = [Self::Visitor, Self::Editor, Self::Admin, Self::Owner];

    /// Whether this role grants everything `minimum` grants.
    #[must_use]
    pub fn satisfies(self, minimum: Self) -> bool {
        self >= minimum
    }
}

// ── Users ───────────────────────────────────────────────────────────────────

/// A registered user, as known to the calendar core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub email: String,
    #[serde(default)]
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    /// Keep the identity subsystem's id when it already issued one.
    #[serde(default)]
    pub id: Option<UserId>,
    pub login: String,
    pub email: String,
    #[serde(default)]
    pub verified: bool,
}

/// Patch for a user's profile. The login never changes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

// ── Calendars ───────────────────────────────────────────────────────────────

/// A named container of events. Ownership lives in [`Membership`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Calendar {
    pub id: CalendarId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCalendar {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Patch for updating a calendar.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CalendarPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The (calendar, user, role) relation governing access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub calendar_id: CalendarId,
    pub user_id: UserId,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

// ── Events ──────────────────────────────────────────────────────────────────

/// What kind of entry an event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    #[default]
    Arrangement,
    Reminder,
    Task,
}

string_enum!(EventType, "event type", {
    Arrangement => "arrangement",
    Reminder => "reminder",
    Task => "task",
});

/// How an event repeats. A recurring event is one row rolled forward in
/// place, never a generated series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Yearly,
}

string_enum!(Recurrence, "recurrence", {
    None => "none",
    Daily => "daily",
    Weekly => "weekly",
    Biweekly => "biweekly",
    Monthly => "monthly",
    Yearly => "yearly",
});

impl Recurrence {
    #[must_use]
    pub fn is_recurring(self) -> bool {
        self != Self::None
    }
}

/// A calendar entry with a time range and two independent notified flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub calendar_id: CalendarId,
    pub creator_id: UserId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub recurrence: Recurrence,
    #[serde(default)]
    pub notified_start: bool,
    #[serde(default)]
    pub notified_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub recurrence: Recurrence,
}

/// Patch for editing an event's content. Notified flags are owned by the
/// scheduler and cannot be patched.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
}

// ── Tags ────────────────────────────────────────────────────────────────────

/// Default colour for new tags.
pub const DEFAULT_TAG_COLOR: &str = "#6c757d";

/// A label that groups events within one calendar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: TagId,
    pub calendar_id: CalendarId,
    pub name: String,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTag {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Patch for updating a tag.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TagPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ── Notifications ───────────────────────────────────────────────────────────

/// Category of an in-app notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    EventReminder,
    EventChange,
    EventCancellation,
    EventInvitation,
}

string_enum!(NotificationKind, "notification kind", {
    EventReminder => "event_reminder",
    EventChange => "event_change",
    EventCancellation => "event_cancellation",
    EventInvitation => "event_invitation",
});

/// A fire-and-forget message for one user. Only `is_read` ever changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for sending a notification to one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    #[serde(default)]
    pub event_id: Option<EventId>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn role_order_is_visitor_editor_admin_owner() {
        assert!(Role::Visitor < Role::Editor);
        assert!(Role::Editor < Role::Admin);
        assert!(Role::Admin < Role::Owner);
        let mut shuffled = [Role::Owner, Role::Visitor, Role::Admin, Role::Editor];
        shuffled.sort();
        assert_eq!(shuffled, Role::ALL);
    }

    #[rstest]
    #[case(Role::Visitor, false)]
    #[case(Role::Editor, true)]
    #[case(Role::Admin, true)]
    #[case(Role::Owner, true)]
    fn satisfies_editor(#[case] role: Role, #[case] expected: bool) {
        assert_eq!(role.satisfies(Role::Editor), expected);
    }

    #[test]
    fn enums_parse_their_wire_names() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert_eq!("biweekly".parse::<Recurrence>().unwrap(), Recurrence::Biweekly);
        assert_eq!("task".parse::<EventType>().unwrap(), EventType::Task);
        assert_eq!(
            "event_reminder".parse::<NotificationKind>().unwrap(),
            NotificationKind::EventReminder
        );
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn new_event_defaults() {
        let json = r#"{
            "title": "standup",
            "startTime": "2025-01-01T10:00:00Z",
            "endTime": "2025-01-01T10:15:00Z"
        }"#;
        let new: NewEvent = serde_json::from_str(json).unwrap();
        assert_eq!(new.event_type, EventType::Arrangement);
        assert_eq!(new.recurrence, Recurrence::None);
        assert!(new.description.is_none());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(
            serde_json::to_string(&NotificationKind::EventChange).unwrap(),
            "\"event_change\""
        );
    }
}
