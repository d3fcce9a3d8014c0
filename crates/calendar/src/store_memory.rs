//! In-memory store for tests and ephemeral runs.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
};

use crate::{
    Error, Result,
    store::{
        CalendarStore, EventStore, MembershipStore, NotificationStore, TagStore, UserStore,
        check_role_change,
    },
    types::{
        Calendar, CalendarId, Event, EventId, Membership, Notification, NotificationId, Role, Tag,
        TagId, User, UserId, now_ms,
    },
};

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    calendars: HashMap<CalendarId, Calendar>,
    /// Insertion order doubles as creation order for `owner_of`.
    memberships: Vec<Membership>,
    events: HashMap<EventId, Event>,
    tags: HashMap<TagId, Tag>,
    event_tags: HashSet<(EventId, TagId)>,
    notifications: Vec<Notification>,
}

impl State {
    fn member_index(&self, calendar_id: &CalendarId, user_id: &UserId) -> Option<usize> {
        self.memberships
            .iter()
            .position(|m| &m.calendar_id == calendar_id && &m.user_id == user_id)
    }

    fn owner_count(&self, calendar_id: &CalendarId) -> usize {
        self.memberships
            .iter()
            .filter(|m| &m.calendar_id == calendar_id && m.role == Role::Owner)
            .count()
    }

    fn remove_calendar(&mut self, id: &CalendarId) {
        self.calendars.remove(id);
        self.memberships.retain(|m| &m.calendar_id != id);
        let removed: HashSet<EventId> = self
            .events
            .values()
            .filter(|e| &e.calendar_id == id)
            .map(|e| e.id.clone())
            .collect();
        self.events.retain(|_, e| &e.calendar_id != id);
        self.tags.retain(|_, t| &t.calendar_id != id);
        let tags = &self.tags;
        self.event_tags
            .retain(|(event, tag)| !removed.contains(event) && tags.contains_key(tag));
    }

    fn update_role(
        &mut self,
        calendar_id: &CalendarId,
        user_id: &UserId,
        expected: Option<Role>,
        role: Role,
    ) -> Result<Membership> {
        let idx = self
            .member_index(calendar_id, user_id)
            .ok_or_else(|| Error::not_found("membership", format!("{calendar_id}/{user_id}")))?;
        let current = self.memberships[idx].role;
        if let Some(expected) = expected
            && current != expected
        {
            return Err(Error::conflict(format!(
                "role of {user_id} in {calendar_id} is {current}, expected {expected}"
            )));
        }
        check_role_change(calendar_id, current, role, self.owner_count(calendar_id))?;
        self.memberships[idx].role = role;
        Ok(self.memberships[idx].clone())
    }
}

/// Store backed by plain collections behind one mutex. Nothing is persisted.
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_events(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.id.cmp(&b.id))
    });
    events
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut state = self.state();
        if state.users.values().any(|u| u.login == user.login) {
            return Err(Error::bad_request(format!(
                "login already taken: {}",
                user.login
            )));
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.state().users.get(id).cloned())
    }

    async fn update_profile(&self, id: &UserId, email: &str, verified: bool) -> Result<()> {
        let mut state = self.state();
        let Some(user) = state.users.get_mut(id) else {
            return Err(Error::not_found("user", id));
        };
        user.email = email.to_string();
        user.verified = verified;
        Ok(())
    }

    async fn find_by_login_or_email(&self, login_or_email: &str) -> Result<Option<User>> {
        let state = self.state();
        let by_login = state.users.values().find(|u| u.login == login_or_email);
        Ok(by_login
            .or_else(|| state.users.values().find(|u| u.email == login_or_email))
            .cloned())
    }

    async fn delete_user(&self, id: &UserId) -> Result<()> {
        let mut state = self.state();
        if state.users.remove(id).is_none() {
            return Err(Error::not_found("user", id));
        }
        let sole_owned: Vec<CalendarId> = state
            .memberships
            .iter()
            .filter(|m| &m.user_id == id && m.role == Role::Owner)
            .map(|m| m.calendar_id.clone())
            .filter(|cal| state.owner_count(cal) == 1)
            .collect();
        for cal in &sole_owned {
            state.remove_calendar(cal);
        }
        state.memberships.retain(|m| &m.user_id != id);
        state.notifications.retain(|n| &n.user_id != id);
        Ok(())
    }
}

#[async_trait]
impl CalendarStore for InMemoryStore {
    async fn create_calendar(&self, calendar: &Calendar, owner: &UserId) -> Result<Membership> {
        let mut state = self.state();
        if !state.users.contains_key(owner) {
            return Err(Error::not_found("user", owner));
        }
        if state.calendars.contains_key(&calendar.id) {
            return Err(Error::bad_request(format!(
                "calendar already exists: {}",
                calendar.id
            )));
        }
        let membership = Membership {
            calendar_id: calendar.id.clone(),
            user_id: owner.clone(),
            role: Role::Owner,
            created_at: calendar.created_at,
        };
        state.calendars.insert(calendar.id.clone(), calendar.clone());
        state.memberships.push(membership.clone());
        Ok(membership)
    }

    async fn get_calendar(&self, id: &CalendarId) -> Result<Option<Calendar>> {
        Ok(self.state().calendars.get(id).cloned())
    }

    async fn update_calendar(&self, calendar: &Calendar) -> Result<()> {
        let mut state = self.state();
        let Some(slot) = state.calendars.get_mut(&calendar.id) else {
            return Err(Error::not_found("calendar", &calendar.id));
        };
        *slot = calendar.clone();
        Ok(())
    }

    async fn delete_calendar(&self, id: &CalendarId) -> Result<()> {
        let mut state = self.state();
        if !state.calendars.contains_key(id) {
            return Err(Error::not_found("calendar", id));
        }
        state.remove_calendar(id);
        Ok(())
    }

    async fn calendars_of_user(&self, user_id: &UserId) -> Result<Vec<(Calendar, Role)>> {
        let state = self.state();
        let mut out: Vec<(Calendar, Role)> = state
            .memberships
            .iter()
            .filter(|m| &m.user_id == user_id)
            .filter_map(|m| {
                state
                    .calendars
                    .get(&m.calendar_id)
                    .map(|c| (c.clone(), m.role))
            })
            .collect();
        out.sort_by(|a, b| {
            a.0.created_at
                .cmp(&b.0.created_at)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        Ok(out)
    }
}

#[async_trait]
impl MembershipStore for InMemoryStore {
    async fn add_member(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
        role: Role,
    ) -> Result<Membership> {
        let mut state = self.state();
        if !state.calendars.contains_key(calendar_id) {
            return Err(Error::not_found("calendar", calendar_id));
        }
        if !state.users.contains_key(user_id) {
            return Err(Error::not_found("user", user_id));
        }
        if state.member_index(calendar_id, user_id).is_some() {
            return Err(Error::DuplicateMembership {
                calendar_id: calendar_id.clone(),
                user_id: user_id.clone(),
            });
        }
        let membership = Membership {
            calendar_id: calendar_id.clone(),
            user_id: user_id.clone(),
            role,
            created_at: now_ms(),
        };
        state.memberships.push(membership.clone());
        Ok(membership)
    }

    async fn remove_member(&self, calendar_id: &CalendarId, user_id: &UserId) -> Result<()> {
        let mut state = self.state();
        let idx = state
            .member_index(calendar_id, user_id)
            .ok_or_else(|| Error::not_found("membership", format!("{calendar_id}/{user_id}")))?;
        if state.memberships[idx].role == Role::Owner {
            return Err(Error::OwnerRemovalForbidden {
                calendar_id: calendar_id.clone(),
            });
        }
        state.memberships.remove(idx);
        Ok(())
    }

    async fn set_role(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
        role: Role,
    ) -> Result<Membership> {
        self.state().update_role(calendar_id, user_id, None, role)
    }

    async fn compare_and_set_role(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
        expected: Role,
        role: Role,
    ) -> Result<Membership> {
        self.state()
            .update_role(calendar_id, user_id, Some(expected), role)
    }

    async fn find_member(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
    ) -> Result<Option<Membership>> {
        let state = self.state();
        Ok(state
            .member_index(calendar_id, user_id)
            .map(|idx| state.memberships[idx].clone()))
    }

    async fn owner_of(&self, calendar_id: &CalendarId) -> Result<Membership> {
        self.state()
            .memberships
            .iter()
            .find(|m| &m.calendar_id == calendar_id && m.role == Role::Owner)
            .cloned()
            .ok_or_else(|| Error::OwnerMissing {
                calendar_id: calendar_id.clone(),
            })
    }

    async fn members_of(&self, calendar_id: &CalendarId) -> Result<Vec<Membership>> {
        Ok(self
            .state()
            .memberships
            .iter()
            .filter(|m| &m.calendar_id == calendar_id)
            .cloned()
            .collect())
    }

    async fn memberships_of_user(&self, user_id: &UserId) -> Result<Vec<Membership>> {
        Ok(self
            .state()
            .memberships
            .iter()
            .filter(|m| &m.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn insert_event(&self, event: &Event) -> Result<()> {
        let mut state = self.state();
        if !state.calendars.contains_key(&event.calendar_id) {
            return Err(Error::not_found("calendar", &event.calendar_id));
        }
        state.events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn get_event(&self, id: &EventId) -> Result<Option<Event>> {
        Ok(self.state().events.get(id).cloned())
    }

    async fn update_event(&self, event: &Event) -> Result<()> {
        let mut state = self.state();
        let Some(stored) = state.events.get_mut(&event.id) else {
            return Err(Error::not_found("event", &event.id));
        };
        stored.title = event.title.clone();
        stored.description = event.description.clone();
        stored.start_time = event.start_time;
        stored.end_time = event.end_time;
        stored.event_type = event.event_type;
        stored.recurrence = event.recurrence;
        stored.updated_at = event.updated_at;
        Ok(())
    }

    async fn delete_event(&self, id: &EventId) -> Result<()> {
        let mut state = self.state();
        if state.events.remove(id).is_none() {
            return Err(Error::not_found("event", id));
        }
        state.event_tags.retain(|(event, _)| event != id);
        Ok(())
    }

    async fn events_in_calendar(&self, calendar_id: &CalendarId) -> Result<Vec<Event>> {
        let events = self
            .state()
            .events
            .values()
            .filter(|e| &e.calendar_id == calendar_id)
            .cloned()
            .collect();
        Ok(sorted_events(events))
    }

    async fn events_by_creator(&self, creator_id: &UserId) -> Result<Vec<Event>> {
        let events = self
            .state()
            .events
            .values()
            .filter(|e| &e.creator_id == creator_id)
            .cloned()
            .collect();
        Ok(sorted_events(events))
    }

    async fn due_for_start(&self, now: DateTime<Utc>) -> Result<Vec<Event>> {
        let events = self
            .state()
            .events
            .values()
            .filter(|e| !e.notified_start && e.start_time <= now)
            .cloned()
            .collect();
        Ok(sorted_events(events))
    }

    async fn due_for_end(&self, now: DateTime<Utc>) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .state()
            .events
            .values()
            .filter(|e| !e.notified_end && e.end_time <= now)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.end_time.cmp(&b.end_time).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn mark_start_notified(&self, id: &EventId) -> Result<bool> {
        let mut state = self.state();
        let event = state
            .events
            .get_mut(id)
            .ok_or_else(|| Error::not_found("event", id))?;
        Ok(!std::mem::replace(&mut event.notified_start, true))
    }

    async fn mark_end_notified(&self, id: &EventId) -> Result<bool> {
        let mut state = self.state();
        let event = state
            .events
            .get_mut(id)
            .ok_or_else(|| Error::not_found("event", id))?;
        Ok(!std::mem::replace(&mut event.notified_end, true))
    }

    async fn roll_forward(
        &self,
        id: &EventId,
        expected_start: DateTime<Utc>,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state();
        let event = state
            .events
            .get_mut(id)
            .ok_or_else(|| Error::not_found("event", id))?;
        if event.start_time != expected_start {
            return Ok(false);
        }
        event.start_time = new_start;
        event.end_time = new_end;
        Ok(true)
    }
}

#[async_trait]
impl TagStore for InMemoryStore {
    async fn insert_tag(&self, tag: &Tag) -> Result<()> {
        let mut state = self.state();
        if !state.calendars.contains_key(&tag.calendar_id) {
            return Err(Error::not_found("calendar", &tag.calendar_id));
        }
        if state
            .tags
            .values()
            .any(|t| t.calendar_id == tag.calendar_id && t.name == tag.name)
        {
            return Err(Error::DuplicateTag {
                calendar_id: tag.calendar_id.clone(),
                name: tag.name.clone(),
            });
        }
        state.tags.insert(tag.id.clone(), tag.clone());
        Ok(())
    }

    async fn get_tag(&self, id: &TagId) -> Result<Option<Tag>> {
        Ok(self.state().tags.get(id).cloned())
    }

    async fn update_tag(&self, tag: &Tag) -> Result<()> {
        let mut state = self.state();
        if !state.tags.contains_key(&tag.id) {
            return Err(Error::not_found("tag", &tag.id));
        }
        if state
            .tags
            .values()
            .any(|t| t.id != tag.id && t.calendar_id == tag.calendar_id && t.name == tag.name)
        {
            return Err(Error::DuplicateTag {
                calendar_id: tag.calendar_id.clone(),
                name: tag.name.clone(),
            });
        }
        state.tags.insert(tag.id.clone(), tag.clone());
        Ok(())
    }

    async fn delete_tag(&self, id: &TagId) -> Result<()> {
        let mut state = self.state();
        if state.tags.remove(id).is_none() {
            return Err(Error::not_found("tag", id));
        }
        state.event_tags.retain(|(_, tag)| tag != id);
        Ok(())
    }

    async fn tags_in_calendar(&self, calendar_id: &CalendarId) -> Result<Vec<Tag>> {
        let mut tags: Vec<Tag> = self
            .state()
            .tags
            .values()
            .filter(|t| &t.calendar_id == calendar_id)
            .cloned()
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn attach_tag(&self, event_id: &EventId, tag_id: &TagId) -> Result<()> {
        let mut state = self.state();
        if !state.events.contains_key(event_id) {
            return Err(Error::not_found("event", event_id));
        }
        if !state.tags.contains_key(tag_id) {
            return Err(Error::not_found("tag", tag_id));
        }
        state
            .event_tags
            .insert((event_id.clone(), tag_id.clone()));
        Ok(())
    }

    async fn detach_tag(&self, event_id: &EventId, tag_id: &TagId) -> Result<()> {
        let mut state = self.state();
        if !state
            .event_tags
            .remove(&(event_id.clone(), tag_id.clone()))
        {
            return Err(Error::not_found("event tag", format!("{event_id}/{tag_id}")));
        }
        Ok(())
    }

    async fn tags_of_event(&self, event_id: &EventId) -> Result<Vec<Tag>> {
        let state = self.state();
        let mut tags: Vec<Tag> = state
            .event_tags
            .iter()
            .filter(|(event, _)| event == event_id)
            .filter_map(|(_, tag)| state.tags.get(tag).cloned())
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn events_with_tag(&self, tag_id: &TagId) -> Result<Vec<Event>> {
        let state = self.state();
        let events = state
            .event_tags
            .iter()
            .filter(|(_, tag)| tag == tag_id)
            .filter_map(|(event, _)| state.events.get(event).cloned())
            .collect();
        Ok(sorted_events(events))
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let mut state = self.state();
        if !state.users.contains_key(&notification.user_id) {
            return Err(Error::not_found("user", &notification.user_id));
        }
        state.notifications.push(notification.clone());
        Ok(())
    }

    async fn get_notification(&self, id: &NotificationId) -> Result<Option<Notification>> {
        Ok(self
            .state()
            .notifications
            .iter()
            .find(|n| &n.id == id)
            .cloned())
    }

    async fn notifications_for_user(
        &self,
        user_id: &UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let mut out: Vec<Notification> = self
            .state()
            .notifications
            .iter()
            .rev()
            .filter(|n| &n.user_id == user_id && !(unread_only && n.is_read))
            .cloned()
            .collect();
        // Stable sort keeps reverse insertion order among equal timestamps.
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<()> {
        let mut state = self.state();
        let notification = state
            .notifications
            .iter_mut()
            .find(|n| &n.id == id)
            .ok_or_else(|| Error::not_found("notification", id))?;
        notification.is_read = true;
        Ok(())
    }

    async fn delete_notification(&self, id: &NotificationId) -> Result<()> {
        let mut state = self.state();
        let before = state.notifications.len();
        state.notifications.retain(|n| &n.id != id);
        if state.notifications.len() == before {
            return Err(Error::not_found("notification", id));
        }
        Ok(())
    }
}
