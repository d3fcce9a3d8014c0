//! Public holidays seeded into a new user's default calendar.

use {
    async_trait::async_trait,
    chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc},
};

use crate::{
    Result,
    recurrence::roll_forward,
    types::{EventType, NewEvent, Recurrence},
};

pub const HOLIDAY_DESCRIPTION: &str = "It is a holiday!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holiday {
    pub name: String,
    pub date: NaiveDate,
}

impl Holiday {
    pub fn new(name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            date,
        }
    }

    /// A yearly all-day reminder from 00:00 to 23:59 UTC. A date already
    /// behind `now` is moved to the following year.
    pub fn to_event(&self, now: DateTime<Utc>) -> Result<NewEvent> {
        let mut start = self.date.and_time(NaiveTime::MIN).and_utc();
        let mut end = start + TimeDelta::minutes(23 * 60 + 59);
        if start < now {
            (start, end) = roll_forward(start, end, Recurrence::Yearly)?;
        }
        Ok(NewEvent {
            title: self.name.clone(),
            description: Some(HOLIDAY_DESCRIPTION.into()),
            start_time: start,
            end_time: end,
            event_type: EventType::Reminder,
            recurrence: Recurrence::Yearly,
        })
    }
}

/// Source of the holidays a freshly registered user starts with.
#[async_trait]
pub trait HolidayProvider: Send + Sync {
    async fn holidays(&self) -> Result<Vec<Holiday>>;
}

/// Seeds nothing.
pub struct NoHolidays;

#[async_trait]
impl HolidayProvider for NoHolidays {
    async fn holidays(&self) -> Result<Vec<Holiday>> {
        Ok(Vec::new())
    }
}

/// A fixed list, e.g. read from configuration.
pub struct StaticHolidays(pub Vec<Holiday>);

#[async_trait]
impl HolidayProvider for StaticHolidays {
    async fn holidays(&self) -> Result<Vec<Holiday>> {
        Ok(self.0.clone())
    }
}
