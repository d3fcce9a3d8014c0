//! Event creation, editing and queries.

use std::{collections::HashSet, sync::Arc};

use {
    chrono::{DateTime, Utc},
    tracing::{info, warn},
};

use crate::{
    Error, Result,
    guard::AccessGuard,
    notifications::Notifier,
    paging::{ListOptions, Page},
    store::{EventStore, MembershipStore, NotificationStore, TagStore},
    types::{
        CalendarId, Event, EventId, EventPatch, NewEvent, NewNotification, NotificationKind, Role,
        TagId, UserId, now_ms,
    },
};

pub struct EventService {
    events: Arc<dyn EventStore>,
    tags: Arc<dyn TagStore>,
    memberships: Arc<dyn MembershipStore>,
    guard: AccessGuard,
    notifier: Notifier,
}

fn check_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if end < start {
        return Err(Error::InvalidTimeRange { start, end });
    }
    Ok(())
}

fn check_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::bad_request("event title must not be empty"));
    }
    Ok(())
}

fn by_start(events: &mut [Event]) {
    events.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.id.cmp(&b.id))
    });
}

impl EventService {
    pub fn new(
        events: Arc<dyn EventStore>,
        tags: Arc<dyn TagStore>,
        memberships: Arc<dyn MembershipStore>,
        notifications: Arc<dyn NotificationStore>,
    ) -> Self {
        let guard = AccessGuard::new(Arc::clone(&memberships));
        Self {
            events,
            tags,
            memberships,
            guard,
            notifier: Notifier::new(notifications),
        }
    }

    /// Let the calendar owner know when somebody else touched an event.
    async fn tell_owner(
        &self,
        event: &Event,
        caller: &UserId,
        kind: NotificationKind,
        title: String,
        message: String,
    ) {
        let owner = match self.memberships.owner_of(&event.calendar_id).await {
            Ok(owner) => owner.user_id,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "owner lookup failed");
                return;
            },
        };
        if &owner == caller {
            return;
        }
        self.notifier
            .send(NewNotification {
                user_id: owner,
                title,
                message,
                kind,
                event_id: Some(event.id.clone()),
            })
            .await;
    }

    async fn load(&self, id: &EventId) -> Result<Event> {
        self.events
            .get_event(id)
            .await?
            .ok_or_else(|| Error::not_found("event", id))
    }

    pub(crate) fn build(calendar_id: &CalendarId, creator: &UserId, new: &NewEvent) -> Event {
        let now = now_ms();
        Event {
            id: EventId::new(),
            calendar_id: calendar_id.clone(),
            creator_id: creator.clone(),
            title: new.title.clone(),
            description: new.description.clone(),
            start_time: new.start_time,
            end_time: new.end_time,
            event_type: new.event_type,
            recurrence: new.recurrence,
            notified_start: false,
            notified_end: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn create_event(
        &self,
        caller: &UserId,
        calendar_id: &CalendarId,
        new: NewEvent,
    ) -> Result<Event> {
        check_title(&new.title)?;
        check_range(new.start_time, new.end_time)?;
        self.guard
            .require_role(calendar_id, caller, Role::Editor)
            .await?;
        let event = Self::build(calendar_id, caller, &new);
        self.events.insert_event(&event).await?;
        info!(event_id = %event.id, %calendar_id, recurrence = %event.recurrence, "event created");
        Ok(event)
    }

    /// Create one copy of the event in each calendar. Editor rights are
    /// checked for every calendar before anything is written.
    pub async fn create_event_for_calendars(
        &self,
        caller: &UserId,
        calendar_ids: &[CalendarId],
        new: NewEvent,
    ) -> Result<Vec<Event>> {
        check_title(&new.title)?;
        check_range(new.start_time, new.end_time)?;
        if calendar_ids.is_empty() {
            return Err(Error::bad_request("no calendars given"));
        }
        let unique: Vec<&CalendarId> = {
            let mut seen = HashSet::new();
            calendar_ids.iter().filter(|id| seen.insert(*id)).collect()
        };
        for calendar_id in &unique {
            self.guard
                .require_role(calendar_id, caller, Role::Editor)
                .await?;
        }

        let mut created = Vec::with_capacity(unique.len());
        for calendar_id in unique {
            let event = Self::build(calendar_id, caller, &new);
            self.events.insert_event(&event).await?;
            created.push(event);
        }
        info!(count = created.len(), "event created in several calendars");
        Ok(created)
    }

    pub async fn get_event(&self, caller: &UserId, id: &EventId) -> Result<Event> {
        let event = self.load(id).await?;
        self.guard.require_member(&event.calendar_id, caller).await?;
        Ok(event)
    }

    /// Edit an event's content and times. The scheduler's notified flags are
    /// left as they are, even when the times move. The calendar owner gets
    /// an [`NotificationKind::EventChange`] notice unless they made the edit.
    pub async fn update_event(
        &self,
        caller: &UserId,
        id: &EventId,
        patch: EventPatch,
    ) -> Result<Event> {
        let mut event = self.load(id).await?;
        self.guard
            .require_role(&event.calendar_id, caller, Role::Editor)
            .await?;

        if let Some(title) = patch.title {
            check_title(&title)?;
            event.title = title;
        }
        if let Some(description) = patch.description {
            event.description = Some(description);
        }
        if let Some(start) = patch.start_time {
            event.start_time = start;
        }
        if let Some(end) = patch.end_time {
            event.end_time = end;
        }
        if let Some(event_type) = patch.event_type {
            event.event_type = event_type;
        }
        if let Some(recurrence) = patch.recurrence {
            event.recurrence = recurrence;
        }
        check_range(event.start_time, event.end_time)?;
        event.updated_at = now_ms();

        self.events.update_event(&event).await?;
        self.tell_owner(
            &event,
            caller,
            NotificationKind::EventChange,
            format!("Event changed: {}", event.title),
            format!("Event \"{}\" was updated.", event.title),
        )
        .await;
        Ok(event)
    }

    /// Only the event's creator may delete it. The calendar owner gets an
    /// [`NotificationKind::EventCancellation`] notice unless they are the
    /// creator.
    pub async fn delete_event(&self, caller: &UserId, id: &EventId) -> Result<()> {
        let event = self.load(id).await?;
        self.guard.require_creator(&event, caller)?;
        self.events.delete_event(id).await?;
        info!(event_id = %id, by = %caller, "event deleted");
        self.tell_owner(
            &event,
            caller,
            NotificationKind::EventCancellation,
            format!("Event cancelled: {}", event.title),
            format!("Event \"{}\" was cancelled.", event.title),
        )
        .await;
        Ok(())
    }

    /// Events of one calendar by start time. Search matches the title.
    pub async fn events_in_calendar(
        &self,
        caller: &UserId,
        calendar_id: &CalendarId,
        options: &ListOptions,
    ) -> Result<Page<Event>> {
        self.guard.require_member(calendar_id, caller).await?;
        let events = self.events.events_in_calendar(calendar_id).await?;
        Ok(options.apply(events, |e| e.title.as_str()))
    }

    /// Events across every calendar the user belongs to.
    pub async fn events_of_user(&self, user_id: &UserId) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for membership in self.memberships.memberships_of_user(user_id).await? {
            events.extend(
                self.events
                    .events_in_calendar(&membership.calendar_id)
                    .await?,
            );
        }
        by_start(&mut events);
        Ok(events)
    }

    /// Events created by `creator` in calendars the caller can see.
    pub async fn events_by_creator(
        &self,
        caller: &UserId,
        creator: &UserId,
    ) -> Result<Vec<Event>> {
        let visible: HashSet<CalendarId> = self
            .memberships
            .memberships_of_user(caller)
            .await?
            .into_iter()
            .map(|m| m.calendar_id)
            .collect();
        Ok(self
            .events
            .events_by_creator(creator)
            .await?
            .into_iter()
            .filter(|e| visible.contains(&e.calendar_id))
            .collect())
    }

    pub async fn events_by_tag(&self, caller: &UserId, tag_id: &TagId) -> Result<Vec<Event>> {
        let tag = self
            .tags
            .get_tag(tag_id)
            .await?
            .ok_or_else(|| Error::not_found("tag", tag_id))?;
        self.guard.require_member(&tag.calendar_id, caller).await?;
        self.tags.events_with_tag(tag_id).await
    }

    pub async fn tag_event(
        &self,
        caller: &UserId,
        event_id: &EventId,
        tag_id: &TagId,
    ) -> Result<()> {
        let calendar_id = self.same_calendar(event_id, tag_id).await?;
        self.guard
            .require_role(&calendar_id, caller, Role::Editor)
            .await?;
        self.tags.attach_tag(event_id, tag_id).await
    }

    pub async fn untag_event(
        &self,
        caller: &UserId,
        event_id: &EventId,
        tag_id: &TagId,
    ) -> Result<()> {
        let calendar_id = self.same_calendar(event_id, tag_id).await?;
        self.guard
            .require_role(&calendar_id, caller, Role::Editor)
            .await?;
        self.tags.detach_tag(event_id, tag_id).await
    }

    async fn same_calendar(&self, event_id: &EventId, tag_id: &TagId) -> Result<CalendarId> {
        let event = self.load(event_id).await?;
        let tag = self
            .tags
            .get_tag(tag_id)
            .await?
            .ok_or_else(|| Error::not_found("tag", tag_id))?;
        if tag.calendar_id != event.calendar_id {
            return Err(Error::bad_request(format!(
                "tag {tag_id} belongs to another calendar than event {event_id}"
            )));
        }
        Ok(event.calendar_id)
    }
}
