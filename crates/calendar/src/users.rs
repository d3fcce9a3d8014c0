//! The user registry the scheduler resolves recipients from.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    Error, Result,
    events::EventService,
    holidays::{HolidayProvider, NoHolidays},
    store::{CalendarStore, EventStore, UserStore},
    types::{Calendar, CalendarId, NewUser, User, UserId, UserPatch, now_ms},
};

/// Title of the calendar every user starts with.
pub const DEFAULT_CALENDAR_TITLE: &str = "My Calendar";

pub struct UserService {
    users: Arc<dyn UserStore>,
    calendars: Arc<dyn CalendarStore>,
    events: Arc<dyn EventStore>,
    holidays: Arc<dyn HolidayProvider>,
}

fn check_email(email: &str) -> Result<()> {
    if !email.contains('@') {
        return Err(Error::bad_request(format!("invalid email: {email}")));
    }
    Ok(())
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserStore>,
        calendars: Arc<dyn CalendarStore>,
        events: Arc<dyn EventStore>,
    ) -> Self {
        Self {
            users,
            calendars,
            events,
            holidays: Arc::new(NoHolidays),
        }
    }

    #[must_use]
    pub fn with_holidays(mut self, holidays: Arc<dyn HolidayProvider>) -> Self {
        self.holidays = holidays;
        self
    }

    /// Store the user, give them an owned "My Calendar" and seed it with
    /// the provider's holidays.
    pub async fn register_user(&self, new: NewUser) -> Result<User> {
        let login = new.login.trim();
        if login.is_empty() {
            return Err(Error::bad_request("login must not be empty"));
        }
        check_email(&new.email)?;
        let user = User {
            id: new.id.unwrap_or_else(UserId::new),
            login: login.to_string(),
            email: new.email,
            verified: new.verified,
            created_at: now_ms(),
        };
        self.users.insert_user(&user).await?;

        let now = now_ms();
        let calendar = Calendar {
            id: CalendarId::new(),
            title: DEFAULT_CALENDAR_TITLE.into(),
            description: None,
            created_at: now,
            updated_at: now,
        };
        self.calendars.create_calendar(&calendar, &user.id).await?;
        let seeded = self.seed_holidays(&user.id, &calendar.id).await;

        info!(
            user_id = %user.id,
            login = %user.login,
            calendar_id = %calendar.id,
            holidays = seeded,
            "user registered"
        );
        Ok(user)
    }

    /// Holidays are best effort: a failing provider or insert is logged and
    /// registration still succeeds.
    async fn seed_holidays(&self, user_id: &UserId, calendar_id: &CalendarId) -> usize {
        let holidays = match self.holidays.holidays().await {
            Ok(holidays) => holidays,
            Err(e) => {
                warn!(%user_id, error = %e, "holiday lookup failed");
                return 0;
            },
        };
        let now = now_ms();
        let mut seeded = 0;
        for holiday in &holidays {
            let inserted = match holiday.to_event(now) {
                Ok(new) => {
                    let event = EventService::build(calendar_id, user_id, &new);
                    self.events.insert_event(&event).await
                },
                Err(e) => Err(e),
            };
            match inserted {
                Ok(()) => seeded += 1,
                Err(e) => {
                    warn!(%user_id, holiday = %holiday.name, error = %e, "holiday not seeded")
                },
            }
        }
        seeded
    }

    pub async fn get_user(&self, id: &UserId) -> Result<User> {
        self.users
            .get_user(id)
            .await?
            .ok_or_else(|| Error::not_found("user", id))
    }

    /// Look a user up by login, falling back to email.
    pub async fn find_user(&self, login_or_email: &str) -> Result<User> {
        let needle = login_or_email.trim();
        self.users
            .find_by_login_or_email(needle)
            .await?
            .ok_or_else(|| Error::not_found("user", needle))
    }

    pub async fn update_profile(&self, id: &UserId, patch: UserPatch) -> Result<User> {
        let mut user = self.get_user(id).await?;
        if let Some(email) = patch.email {
            check_email(&email)?;
            user.email = email;
        }
        if let Some(verified) = patch.verified {
            user.verified = verified;
        }
        self.users
            .update_profile(id, &user.email, user.verified)
            .await?;
        info!(user_id = %id, verified = user.verified, "profile updated");
        Ok(user)
    }

    /// Delete the user together with their memberships, their notifications
    /// and any calendar they are the only owner of.
    pub async fn delete_user(&self, id: &UserId) -> Result<()> {
        self.users.delete_user(id).await?;
        info!(user_id = %id, "user deleted");
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            holidays::{HOLIDAY_DESCRIPTION, Holiday, StaticHolidays},
            next_occurrence,
            store::MembershipStore,
            store_memory::InMemoryStore,
            types::{EventType, Recurrence, Role},
        },
        async_trait::async_trait,
        chrono::{Days, NaiveDate, TimeZone, Utc},
    };

    fn service(store: &Arc<InMemoryStore>) -> UserService {
        UserService::new(store.clone(), store.clone(), store.clone())
    }

    fn new_user(login: &str) -> NewUser {
        NewUser {
            id: None,
            login: login.into(),
            email: format!("{login}@example.com"),
            verified: false,
        }
    }

    #[tokio::test]
    async fn register_get_delete() {
        let service = service(&Arc::new(InMemoryStore::new()));
        let user = service.register_user(new_user("dana")).await.unwrap();
        assert_eq!(service.get_user(&user.id).await.unwrap().login, "dana");

        let err = service.register_user(new_user("dana")).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));

        service.delete_user(&user.id).await.unwrap();
        let err = service.get_user(&user.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn keeps_issued_id() {
        let service = service(&Arc::new(InMemoryStore::new()));
        let mut new = new_user("eli");
        new.id = Some(UserId::from("idp-42"));
        let user = service.register_user(new).await.unwrap();
        assert_eq!(user.id.as_str(), "idp-42");
    }

    #[tokio::test]
    async fn rejects_bad_email() {
        let service = service(&Arc::new(InMemoryStore::new()));
        let mut new = new_user("fay");
        new.email = "nope".into();
        assert!(service.register_user(new).await.is_err());
    }

    #[tokio::test]
    async fn registration_creates_owned_default_calendar() {
        let store = Arc::new(InMemoryStore::new());
        let user = service(&store)
            .register_user(new_user("gil"))
            .await
            .unwrap();

        let calendars = store.calendars_of_user(&user.id).await.unwrap();
        assert_eq!(calendars.len(), 1);
        let (calendar, role) = &calendars[0];
        assert_eq!(calendar.title, DEFAULT_CALENDAR_TITLE);
        assert_eq!(*role, Role::Owner);
        assert_eq!(store.owner_of(&calendar.id).await.unwrap().user_id, user.id);
        assert!(store.events_in_calendar(&calendar.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn registration_seeds_holidays_as_yearly_reminders() {
        let store = Arc::new(InMemoryStore::new());
        let today = Utc::now().date_naive();
        let past = today.checked_sub_days(Days::new(30)).unwrap();
        let upcoming = today.checked_add_days(Days::new(30)).unwrap();
        let service = service(&store).with_holidays(Arc::new(StaticHolidays(vec![
            Holiday::new("Founders Day", past),
            Holiday::new("Harvest Day", upcoming),
        ])));

        let user = service.register_user(new_user("hana")).await.unwrap();
        let (calendar, _) = store.calendars_of_user(&user.id).await.unwrap().remove(0);
        let events = store.events_in_calendar(&calendar.id).await.unwrap();
        assert_eq!(events.len(), 2);
        for event in &events {
            assert_eq!(event.creator_id, user.id);
            assert_eq!(event.event_type, EventType::Reminder);
            assert_eq!(event.recurrence, Recurrence::Yearly);
            assert_eq!(event.description.as_deref(), Some(HOLIDAY_DESCRIPTION));
            assert!(!event.notified_start && !event.notified_end);
        }

        let founders = events.iter().find(|e| e.title == "Founders Day").unwrap();
        let midnight =
            |date: NaiveDate| Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(
            founders.start_time,
            next_occurrence(midnight(past), Recurrence::Yearly).unwrap()
        );
        assert!(founders.start_time > Utc::now());

        let harvest = events.iter().find(|e| e.title == "Harvest Day").unwrap();
        assert_eq!(harvest.start_time, midnight(upcoming));
        assert_eq!(
            harvest.end_time,
            Utc.from_utc_datetime(&upcoming.and_hms_opt(23, 59, 0).unwrap())
        );
    }

    struct BrokenHolidays;

    #[async_trait]
    impl HolidayProvider for BrokenHolidays {
        async fn holidays(&self) -> Result<Vec<Holiday>> {
            Err(Error::message("holiday service unreachable"))
        }
    }

    #[tokio::test]
    async fn failing_holiday_provider_does_not_block_registration() {
        let store = Arc::new(InMemoryStore::new());
        let user = service(&store)
            .with_holidays(Arc::new(BrokenHolidays))
            .register_user(new_user("ivo"))
            .await
            .unwrap();
        let calendars = store.calendars_of_user(&user.id).await.unwrap();
        assert_eq!(calendars.len(), 1);
        assert!(
            store
                .events_in_calendar(&calendars[0].0.id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn profile_update_and_lookup() {
        let service = service(&Arc::new(InMemoryStore::new()));
        let user = service.register_user(new_user("jo")).await.unwrap();

        let updated = service
            .update_profile(&user.id, UserPatch {
                verified: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(updated.verified);
        assert_eq!(updated.email, "jo@example.com");

        let err = service
            .update_profile(&user.id, UserPatch {
                email: Some("not-an-email".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));

        service
            .update_profile(&user.id, UserPatch {
                email: Some("jo@new.example".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(service.find_user("jo").await.unwrap().id, user.id);
        assert_eq!(service.find_user(" jo@new.example ").await.unwrap().id, user.id);
        let err = service.find_user("jo@example.com").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let err = service
            .update_profile(&UserId::new(), UserPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
