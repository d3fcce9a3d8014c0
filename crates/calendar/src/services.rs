//! All services wired to one backend.

use std::sync::Arc;

use crate::{
    calendars::CalendarService, events::EventService, holidays::HolidayProvider,
    notifications::NotificationService, store::Repository, tags::TagService, users::UserService,
};

pub struct Services {
    pub users: UserService,
    pub calendars: CalendarService,
    pub events: EventService,
    pub tags: TagService,
    pub notifications: NotificationService,
}

impl Services {
    pub fn new<R: Repository + 'static>(store: Arc<R>) -> Self {
        Self {
            users: UserService::new(store.clone(), store.clone(), store.clone()),
            calendars: CalendarService::new(
                store.clone(),
                store.clone(),
                store.clone(),
                store.clone(),
            ),
            events: EventService::new(store.clone(), store.clone(), store.clone(), store.clone()),
            tags: TagService::new(store.clone(), store.clone()),
            notifications: NotificationService::new(store.clone(), store),
        }
    }

    /// Like [`new`](Self::new), seeding new users' calendars from `holidays`.
    pub fn with_holidays<R: Repository + 'static>(
        store: Arc<R>,
        holidays: Arc<dyn HolidayProvider>,
    ) -> Self {
        let mut services = Self::new(store);
        services.users = services.users.with_holidays(holidays);
        services
    }
}
