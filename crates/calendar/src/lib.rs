//! Calendar core: users, calendars, role-based memberships, events, tags and
//! in-app notifications.
//!
//! Storage is abstracted behind the traits in [`store`], with an in-memory
//! implementation for tests and a SQLite one for deployments. The services
//! in [`calendars`], [`events`], [`tags`], [`notifications`] and [`users`]
//! apply the access rules from [`guard`] on top of the stores. New users get
//! a default calendar seeded from a [`HolidayProvider`].

pub mod calendars;
pub mod error;
pub mod events;
pub mod guard;
pub mod holidays;
pub mod notifications;
pub mod paging;
pub mod recurrence;
pub mod services;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod tags;
pub mod types;
pub mod users;

pub use {
    error::{Error, ErrorKind, Result},
    guard::AccessGuard,
    holidays::{Holiday, HolidayProvider},
    paging::{ListOptions, Page},
    recurrence::next_occurrence,
    services::Services,
    store::Repository,
};

/// Run database migrations for the calendar crate.
///
/// Creates the user, calendar, membership, event, tag and notification
/// tables. Call at startup before [`store_sqlite::SqliteStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
