//! Persistence traits for the calendar core.
//!
//! Every query the services and the scheduler need is an explicit method;
//! there is no lazy relation loading.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
};

use crate::{
    Error, Result,
    types::{
        Calendar, CalendarId, Event, EventId, Membership, Notification, NotificationId, Role, Tag,
        TagId, User, UserId,
    },
};

/// Registry of users known to the core.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `BadRequest` when the login is taken.
    async fn insert_user(&self, user: &User) -> Result<()>;
    async fn get_user(&self, id: &UserId) -> Result<Option<User>>;
    /// Overwrites the mutable profile columns. `NotFound` if absent.
    async fn update_profile(&self, id: &UserId, email: &str, verified: bool) -> Result<()>;
    /// A login match wins over an email match.
    async fn find_by_login_or_email(&self, login_or_email: &str) -> Result<Option<User>>;
    /// Removes the user, their memberships and notifications, and every
    /// calendar they are the only owner of.
    async fn delete_user(&self, id: &UserId) -> Result<()>;
}

#[async_trait]
pub trait CalendarStore: Send + Sync {
    /// Inserts the calendar and its owner membership atomically.
    async fn create_calendar(&self, calendar: &Calendar, owner: &UserId) -> Result<Membership>;
    async fn get_calendar(&self, id: &CalendarId) -> Result<Option<Calendar>>;
    async fn update_calendar(&self, calendar: &Calendar) -> Result<()>;
    /// Cascades to memberships, events, tags and event/tag links.
    async fn delete_calendar(&self, id: &CalendarId) -> Result<()>;
    /// Calendars the user belongs to, with the user's role in each.
    async fn calendars_of_user(&self, user_id: &UserId) -> Result<Vec<(Calendar, Role)>>;
}

/// Who may do what to which calendar.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn add_member(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
        role: Role,
    ) -> Result<Membership>;

    /// Fails with `OwnerRemovalForbidden` for the owner membership.
    async fn remove_member(&self, calendar_id: &CalendarId, user_id: &UserId) -> Result<()>;

    /// Setting [`Role::Owner`] does not demote the previous owner. Moving a
    /// user away from owner is only allowed while another owner exists.
    async fn set_role(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
        role: Role,
    ) -> Result<Membership>;

    /// Like [`set_role`](Self::set_role), but fails with `Conflict` when the
    /// stored role is no longer `expected`.
    async fn compare_and_set_role(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
        expected: Role,
        role: Role,
    ) -> Result<Membership>;

    async fn find_member(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
    ) -> Result<Option<Membership>>;

    /// The earliest owner membership; `OwnerMissing` if there is none.
    async fn owner_of(&self, calendar_id: &CalendarId) -> Result<Membership>;

    async fn members_of(&self, calendar_id: &CalendarId) -> Result<Vec<Membership>>;

    async fn memberships_of_user(&self, user_id: &UserId) -> Result<Vec<Membership>>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: &Event) -> Result<()>;
    async fn get_event(&self, id: &EventId) -> Result<Option<Event>>;
    /// Writes content and time columns only. Notified flags are untouched.
    async fn update_event(&self, event: &Event) -> Result<()>;
    async fn delete_event(&self, id: &EventId) -> Result<()>;
    async fn events_in_calendar(&self, calendar_id: &CalendarId) -> Result<Vec<Event>>;
    async fn events_by_creator(&self, creator_id: &UserId) -> Result<Vec<Event>>;

    /// Events with `start_time <= now` whose start was not yet announced.
    async fn due_for_start(&self, now: DateTime<Utc>) -> Result<Vec<Event>>;
    /// Events with `end_time <= now` whose end was not yet announced.
    async fn due_for_end(&self, now: DateTime<Utc>) -> Result<Vec<Event>>;

    /// Flip `notified_start` from false to true. `false` if it was already set.
    async fn mark_start_notified(&self, id: &EventId) -> Result<bool>;
    /// Flip `notified_end` from false to true. `false` if it was already set.
    async fn mark_end_notified(&self, id: &EventId) -> Result<bool>;

    /// Move an occurrence to `new_start`/`new_end` if it still starts at
    /// `expected_start`. `false` when another writer moved it first.
    async fn roll_forward(
        &self,
        id: &EventId,
        expected_start: DateTime<Utc>,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<bool>;
}

#[async_trait]
pub trait TagStore: Send + Sync {
    /// Fails with `DuplicateTag` when the name is taken in the calendar.
    async fn insert_tag(&self, tag: &Tag) -> Result<()>;
    async fn get_tag(&self, id: &TagId) -> Result<Option<Tag>>;
    async fn update_tag(&self, tag: &Tag) -> Result<()>;
    async fn delete_tag(&self, id: &TagId) -> Result<()>;
    async fn tags_in_calendar(&self, calendar_id: &CalendarId) -> Result<Vec<Tag>>;
    /// Idempotent.
    async fn attach_tag(&self, event_id: &EventId, tag_id: &TagId) -> Result<()>;
    async fn detach_tag(&self, event_id: &EventId, tag_id: &TagId) -> Result<()>;
    async fn tags_of_event(&self, event_id: &EventId) -> Result<Vec<Tag>>;
    async fn events_with_tag(&self, tag_id: &TagId) -> Result<Vec<Event>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(&self, notification: &Notification) -> Result<()>;
    async fn get_notification(&self, id: &NotificationId) -> Result<Option<Notification>>;
    /// Newest first.
    async fn notifications_for_user(
        &self,
        user_id: &UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>>;
    async fn mark_read(&self, id: &NotificationId) -> Result<()>;
    async fn delete_notification(&self, id: &NotificationId) -> Result<()>;
}

/// Reject a role change that would leave the calendar without an owner.
/// `owners` counts owner memberships before the change.
pub(crate) fn check_role_change(
    calendar_id: &CalendarId,
    current: Role,
    role: Role,
    owners: usize,
) -> Result<()> {
    if current == Role::Owner && role != Role::Owner && owners <= 1 {
        return Err(Error::OwnerDemotionForbidden {
            calendar_id: calendar_id.clone(),
        });
    }
    Ok(())
}

/// Every store the core needs, implemented by one backend.
pub trait Repository:
    UserStore + CalendarStore + MembershipStore + EventStore + TagStore + NotificationStore
{
}

impl<T> Repository for T where
    T: UserStore + CalendarStore + MembershipStore + EventStore + TagStore + NotificationStore
{
}
