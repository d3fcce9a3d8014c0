//! SQLite-backed store using sqlx.
//!
//! Timestamps are stored as epoch milliseconds. Cascades are issued
//! explicitly inside a transaction so they do not depend on the connection's
//! `foreign_keys` pragma.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::{
        Row, SqliteConnection, SqlitePool,
        sqlite::{SqlitePoolOptions, SqliteRow},
    },
    tracing::debug,
};

use crate::{
    Error, Result,
    error::Context,
    store::{
        CalendarStore, EventStore, MembershipStore, NotificationStore, TagStore, UserStore,
        check_role_change,
    },
    types::{
        Calendar, CalendarId, Event, EventId, Membership, Notification, NotificationId, Role, Tag,
        TagId, User, UserId, now_ms,
    },
};

/// SQLite-backed persistence for the whole calendar core.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store with its own connection pool and run migrations.
    ///
    /// For a pool shared with other components use [`SqliteStore::with_pool`]
    /// after calling [`crate::run_migrations`].
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_ms(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("timestamp out of range: {ms}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: UserId::from(row.get::<String, _>("id")),
        login: row.get("login"),
        email: row.get("email"),
        verified: row.get("verified"),
        created_at: from_ms(row.get("created_at_ms"))?,
    })
}

fn calendar_from_row(row: &SqliteRow) -> Result<Calendar> {
    Ok(Calendar {
        id: CalendarId::from(row.get::<String, _>("id")),
        title: row.get("title"),
        description: row.get("description"),
        created_at: from_ms(row.get("created_at_ms"))?,
        updated_at: from_ms(row.get("updated_at_ms"))?,
    })
}

fn membership_from_row(row: &SqliteRow) -> Result<Membership> {
    Ok(Membership {
        calendar_id: CalendarId::from(row.get::<String, _>("calendar_id")),
        user_id: UserId::from(row.get::<String, _>("user_id")),
        role: row.get::<String, _>("role").parse()?,
        created_at: from_ms(row.get("created_at_ms"))?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<Event> {
    Ok(Event {
        id: EventId::from(row.get::<String, _>("id")),
        calendar_id: CalendarId::from(row.get::<String, _>("calendar_id")),
        creator_id: UserId::from(row.get::<String, _>("creator_id")),
        title: row.get("title"),
        description: row.get("description"),
        start_time: from_ms(row.get("start_at_ms"))?,
        end_time: from_ms(row.get("end_at_ms"))?,
        event_type: row.get::<String, _>("event_type").parse()?,
        recurrence: row.get::<String, _>("recurrence").parse()?,
        notified_start: row.get("notified_start"),
        notified_end: row.get("notified_end"),
        created_at: from_ms(row.get("created_at_ms"))?,
        updated_at: from_ms(row.get("updated_at_ms"))?,
    })
}

fn tag_from_row(row: &SqliteRow) -> Result<Tag> {
    Ok(Tag {
        id: TagId::from(row.get::<String, _>("id")),
        calendar_id: CalendarId::from(row.get::<String, _>("calendar_id")),
        name: row.get("name"),
        color: row.get("color"),
        description: row.get("description"),
        created_at: from_ms(row.get("created_at_ms"))?,
    })
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification> {
    Ok(Notification {
        id: NotificationId::from(row.get::<String, _>("id")),
        user_id: UserId::from(row.get::<String, _>("user_id")),
        title: row.get("title"),
        message: row.get("message"),
        kind: row.get::<String, _>("kind").parse()?,
        event_id: row
            .get::<Option<String>, _>("event_id")
            .map(EventId::from),
        is_read: row.get("is_read"),
        created_at: from_ms(row.get("created_at_ms"))?,
    })
}

fn collect<T>(rows: &[SqliteRow], decode: fn(&SqliteRow) -> Result<T>) -> Result<Vec<T>> {
    rows.iter().map(decode).collect()
}

/// Delete a calendar and everything hanging off it. Returns the number of
/// calendar rows removed.
async fn purge_calendar(conn: &mut SqliteConnection, id: &CalendarId) -> Result<u64> {
    sqlx::query(
        "DELETE FROM event_tags
         WHERE event_id IN (SELECT id FROM events WHERE calendar_id = ?)
            OR tag_id IN (SELECT id FROM tags WHERE calendar_id = ?)",
    )
    .bind(id.as_str())
    .bind(id.as_str())
    .execute(&mut *conn)
    .await?;
    for table in ["events", "tags", "calendar_members"] {
        sqlx::query(&format!("DELETE FROM {table} WHERE calendar_id = ?"))
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;
    }
    let result = sqlx::query("DELETE FROM calendars WHERE id = ?")
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

async fn exists(pool: &SqlitePool, table: &str, id: &str) -> Result<bool> {
    let row = sqlx::query(&format!("SELECT 1 FROM {table} WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

impl SqliteStore {
    async fn require_event(&self, id: &EventId) -> Result<()> {
        if exists(&self.pool, "events", id.as_str()).await? {
            Ok(())
        } else {
            Err(Error::not_found("event", id))
        }
    }

    async fn change_role(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
        expected: Option<Role>,
        role: Role,
    ) -> Result<Membership> {
        let mut tx = self.pool.begin().await?;

        let current: Role = sqlx::query(
            "SELECT role FROM calendar_members WHERE calendar_id = ? AND user_id = ?",
        )
        .bind(calendar_id.as_str())
        .bind(user_id.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found("membership", format!("{calendar_id}/{user_id}")))?
        .get::<String, _>("role")
        .parse()?;

        if let Some(expected) = expected
            && current != expected
        {
            return Err(Error::conflict(format!(
                "role of {user_id} in {calendar_id} is {current}, expected {expected}"
            )));
        }

        let owners: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM calendar_members WHERE calendar_id = ? AND role = 'owner'",
        )
        .bind(calendar_id.as_str())
        .fetch_one(&mut *tx)
        .await?
        .get("n");
        check_role_change(
            calendar_id,
            current,
            role,
            usize::try_from(owners).unwrap_or_default(),
        )?;

        let updated = sqlx::query(
            "UPDATE calendar_members SET role = ?
             WHERE calendar_id = ? AND user_id = ? AND role = ?",
        )
        .bind(role.as_str())
        .bind(calendar_id.as_str())
        .bind(user_id.as_str())
        .bind(current.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::conflict(format!(
                "role of {user_id} in {calendar_id} changed concurrently"
            )));
        }

        let row = sqlx::query(
            "SELECT * FROM calendar_members WHERE calendar_id = ? AND user_id = ?",
        )
        .bind(calendar_id.as_str())
        .bind(user_id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let membership = membership_from_row(&row)?;
        tx.commit().await?;
        Ok(membership)
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, login, email, verified, created_at_ms) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.id.as_str())
        .bind(&user.login)
        .bind(&user.email)
        .bind(user.verified)
        .bind(to_ms(user.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::bad_request(format!("login already taken: {}", user.login))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn update_profile(&self, id: &UserId, email: &str, verified: bool) -> Result<()> {
        let result = sqlx::query("UPDATE users SET email = ?, verified = ? WHERE id = ?")
            .bind(email)
            .bind(verified)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("user", id));
        }
        Ok(())
    }

    async fn find_by_login_or_email(&self, login_or_email: &str) -> Result<Option<User>> {
        sqlx::query(
            "SELECT * FROM users WHERE login = ? OR email = ?
             ORDER BY login = ? DESC, created_at_ms LIMIT 1",
        )
        .bind(login_or_email)
        .bind(login_or_email)
        .bind(login_or_email)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(user_from_row)
        .transpose()
    }

    async fn delete_user(&self, id: &UserId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let sole_owned: Vec<String> = sqlx::query(
            "SELECT m.calendar_id FROM calendar_members m
             WHERE m.user_id = ? AND m.role = 'owner'
               AND (SELECT COUNT(*) FROM calendar_members o
                    WHERE o.calendar_id = m.calendar_id AND o.role = 'owner') = 1",
        )
        .bind(id.as_str())
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|row| row.get("calendar_id"))
        .collect();

        for calendar_id in sole_owned {
            let calendar_id = CalendarId::from(calendar_id);
            purge_calendar(&mut tx, &calendar_id).await?;
            debug!(user_id = %id, %calendar_id, "deleted calendar with its only owner");
        }

        for statement in [
            "DELETE FROM calendar_members WHERE user_id = ?",
            "DELETE FROM notifications WHERE user_id = ?",
        ] {
            sqlx::query(statement)
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
        }

        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("user", id));
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CalendarStore for SqliteStore {
    async fn create_calendar(&self, calendar: &Calendar, owner: &UserId) -> Result<Membership> {
        if !exists(&self.pool, "users", owner.as_str()).await? {
            return Err(Error::not_found("user", owner));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO calendars (id, title, description, created_at_ms, updated_at_ms)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(calendar.id.as_str())
        .bind(&calendar.title)
        .bind(&calendar.description)
        .bind(to_ms(calendar.created_at))
        .bind(to_ms(calendar.updated_at))
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO calendar_members (calendar_id, user_id, role, created_at_ms)
             VALUES (?, ?, 'owner', ?)",
        )
        .bind(calendar.id.as_str())
        .bind(owner.as_str())
        .bind(to_ms(calendar.created_at))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Membership {
            calendar_id: calendar.id.clone(),
            user_id: owner.clone(),
            role: Role::Owner,
            created_at: calendar.created_at,
        })
    }

    async fn get_calendar(&self, id: &CalendarId) -> Result<Option<Calendar>> {
        sqlx::query("SELECT * FROM calendars WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(calendar_from_row)
            .transpose()
    }

    async fn update_calendar(&self, calendar: &Calendar) -> Result<()> {
        let result = sqlx::query(
            "UPDATE calendars SET title = ?, description = ?, updated_at_ms = ? WHERE id = ?",
        )
        .bind(&calendar.title)
        .bind(&calendar.description)
        .bind(to_ms(calendar.updated_at))
        .bind(calendar.id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("calendar", &calendar.id));
        }
        Ok(())
    }

    async fn delete_calendar(&self, id: &CalendarId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if purge_calendar(&mut tx, id).await? == 0 {
            return Err(Error::not_found("calendar", id));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn calendars_of_user(&self, user_id: &UserId) -> Result<Vec<(Calendar, Role)>> {
        let rows = sqlx::query(
            "SELECT c.*, m.role FROM calendars c
             JOIN calendar_members m ON m.calendar_id = c.id
             WHERE m.user_id = ?
             ORDER BY c.created_at_ms, c.id",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<(Calendar, Role)> {
                let role: Role = row.get::<String, _>("role").parse()?;
                Ok((calendar_from_row(row)?, role))
            })
            .collect()
    }
}

#[async_trait]
impl MembershipStore for SqliteStore {
    async fn add_member(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
        role: Role,
    ) -> Result<Membership> {
        if !exists(&self.pool, "calendars", calendar_id.as_str()).await? {
            return Err(Error::not_found("calendar", calendar_id));
        }
        if !exists(&self.pool, "users", user_id.as_str()).await? {
            return Err(Error::not_found("user", user_id));
        }

        let membership = Membership {
            calendar_id: calendar_id.clone(),
            user_id: user_id.clone(),
            role,
            created_at: now_ms(),
        };
        sqlx::query(
            "INSERT INTO calendar_members (calendar_id, user_id, role, created_at_ms)
             VALUES (?, ?, ?, ?)",
        )
        .bind(calendar_id.as_str())
        .bind(user_id.as_str())
        .bind(role.as_str())
        .bind(to_ms(membership.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::DuplicateMembership {
                    calendar_id: calendar_id.clone(),
                    user_id: user_id.clone(),
                }
            } else {
                e.into()
            }
        })?;
        Ok(membership)
    }

    async fn remove_member(&self, calendar_id: &CalendarId, user_id: &UserId) -> Result<()> {
        let member = self
            .find_member(calendar_id, user_id)
            .await?
            .ok_or_else(|| Error::not_found("membership", format!("{calendar_id}/{user_id}")))?;
        if member.role == Role::Owner {
            return Err(Error::OwnerRemovalForbidden {
                calendar_id: calendar_id.clone(),
            });
        }
        // The role guard keeps a concurrent promotion to owner from being
        // deleted underneath us.
        let result = sqlx::query(
            "DELETE FROM calendar_members
             WHERE calendar_id = ? AND user_id = ? AND role != 'owner'",
        )
        .bind(calendar_id.as_str())
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::conflict(format!(
                "membership of {user_id} in {calendar_id} changed concurrently"
            )));
        }
        Ok(())
    }

    async fn set_role(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
        role: Role,
    ) -> Result<Membership> {
        self.change_role(calendar_id, user_id, None, role).await
    }

    async fn compare_and_set_role(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
        expected: Role,
        role: Role,
    ) -> Result<Membership> {
        self.change_role(calendar_id, user_id, Some(expected), role)
            .await
    }

    async fn find_member(
        &self,
        calendar_id: &CalendarId,
        user_id: &UserId,
    ) -> Result<Option<Membership>> {
        sqlx::query("SELECT * FROM calendar_members WHERE calendar_id = ? AND user_id = ?")
            .bind(calendar_id.as_str())
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(membership_from_row)
            .transpose()
    }

    async fn owner_of(&self, calendar_id: &CalendarId) -> Result<Membership> {
        let row = sqlx::query(
            "SELECT * FROM calendar_members
             WHERE calendar_id = ? AND role = 'owner'
             ORDER BY created_at_ms, rowid
             LIMIT 1",
        )
        .bind(calendar_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::OwnerMissing {
            calendar_id: calendar_id.clone(),
        })?;
        membership_from_row(&row)
    }

    async fn members_of(&self, calendar_id: &CalendarId) -> Result<Vec<Membership>> {
        let rows = sqlx::query(
            "SELECT * FROM calendar_members WHERE calendar_id = ? ORDER BY created_at_ms, rowid",
        )
        .bind(calendar_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, membership_from_row)
    }

    async fn memberships_of_user(&self, user_id: &UserId) -> Result<Vec<Membership>> {
        let rows = sqlx::query(
            "SELECT * FROM calendar_members WHERE user_id = ? ORDER BY created_at_ms, rowid",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, membership_from_row)
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn insert_event(&self, event: &Event) -> Result<()> {
        if !exists(&self.pool, "calendars", event.calendar_id.as_str()).await? {
            return Err(Error::not_found("calendar", &event.calendar_id));
        }
        sqlx::query(
            "INSERT INTO events (id, calendar_id, creator_id, title, description, start_at_ms,
                                 end_at_ms, event_type, recurrence, notified_start, notified_end,
                                 created_at_ms, updated_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.as_str())
        .bind(event.calendar_id.as_str())
        .bind(event.creator_id.as_str())
        .bind(&event.title)
        .bind(&event.description)
        .bind(to_ms(event.start_time))
        .bind(to_ms(event.end_time))
        .bind(event.event_type.as_str())
        .bind(event.recurrence.as_str())
        .bind(event.notified_start)
        .bind(event.notified_end)
        .bind(to_ms(event.created_at))
        .bind(to_ms(event.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_event(&self, id: &EventId) -> Result<Option<Event>> {
        sqlx::query("SELECT * FROM events WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(event_from_row)
            .transpose()
    }

    async fn update_event(&self, event: &Event) -> Result<()> {
        let result = sqlx::query(
            "UPDATE events
             SET title = ?, description = ?, start_at_ms = ?, end_at_ms = ?,
                 event_type = ?, recurrence = ?, updated_at_ms = ?
             WHERE id = ?",
        )
        .bind(&event.title)
        .bind(&event.description)
        .bind(to_ms(event.start_time))
        .bind(to_ms(event.end_time))
        .bind(event.event_type.as_str())
        .bind(event.recurrence.as_str())
        .bind(to_ms(event.updated_at))
        .bind(event.id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("event", &event.id));
        }
        Ok(())
    }

    async fn delete_event(&self, id: &EventId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM event_tags WHERE event_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("event", id));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn events_in_calendar(&self, calendar_id: &CalendarId) -> Result<Vec<Event>> {
        let rows =
            sqlx::query("SELECT * FROM events WHERE calendar_id = ? ORDER BY start_at_ms, id")
                .bind(calendar_id.as_str())
                .fetch_all(&self.pool)
                .await?;
        collect(&rows, event_from_row)
    }

    async fn events_by_creator(&self, creator_id: &UserId) -> Result<Vec<Event>> {
        let rows =
            sqlx::query("SELECT * FROM events WHERE creator_id = ? ORDER BY start_at_ms, id")
                .bind(creator_id.as_str())
                .fetch_all(&self.pool)
                .await?;
        collect(&rows, event_from_row)
    }

    async fn due_for_start(&self, now: DateTime<Utc>) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT * FROM events
             WHERE notified_start = 0 AND start_at_ms <= ?
             ORDER BY start_at_ms, id",
        )
        .bind(to_ms(now))
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, event_from_row)
    }

    async fn due_for_end(&self, now: DateTime<Utc>) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT * FROM events
             WHERE notified_end = 0 AND end_at_ms <= ?
             ORDER BY end_at_ms, id",
        )
        .bind(to_ms(now))
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, event_from_row)
    }

    async fn mark_start_notified(&self, id: &EventId) -> Result<bool> {
        let result =
            sqlx::query("UPDATE events SET notified_start = 1 WHERE id = ? AND notified_start = 0")
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            self.require_event(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn mark_end_notified(&self, id: &EventId) -> Result<bool> {
        let result =
            sqlx::query("UPDATE events SET notified_end = 1 WHERE id = ? AND notified_end = 0")
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            self.require_event(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn roll_forward(
        &self,
        id: &EventId,
        expected_start: DateTime<Utc>,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE events SET start_at_ms = ?, end_at_ms = ?
             WHERE id = ? AND start_at_ms = ?",
        )
        .bind(to_ms(new_start))
        .bind(to_ms(new_end))
        .bind(id.as_str())
        .bind(to_ms(expected_start))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            self.require_event(id).await?;
            return Ok(false);
        }
        Ok(true)
    }
}

#[async_trait]
impl TagStore for SqliteStore {
    async fn insert_tag(&self, tag: &Tag) -> Result<()> {
        if !exists(&self.pool, "calendars", tag.calendar_id.as_str()).await? {
            return Err(Error::not_found("calendar", &tag.calendar_id));
        }
        sqlx::query(
            "INSERT INTO tags (id, calendar_id, name, color, description, created_at_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(tag.id.as_str())
        .bind(tag.calendar_id.as_str())
        .bind(&tag.name)
        .bind(&tag.color)
        .bind(&tag.description)
        .bind(to_ms(tag.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_tag_or(e, tag))?;
        Ok(())
    }

    async fn get_tag(&self, id: &TagId) -> Result<Option<Tag>> {
        sqlx::query("SELECT * FROM tags WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(tag_from_row)
            .transpose()
    }

    async fn update_tag(&self, tag: &Tag) -> Result<()> {
        let result =
            sqlx::query("UPDATE tags SET name = ?, color = ?, description = ? WHERE id = ?")
                .bind(&tag.name)
                .bind(&tag.color)
                .bind(&tag.description)
                .bind(tag.id.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| duplicate_tag_or(e, tag))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("tag", &tag.id));
        }
        Ok(())
    }

    async fn delete_tag(&self, id: &TagId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM event_tags WHERE tag_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM tags WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("tag", id));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn tags_in_calendar(&self, calendar_id: &CalendarId) -> Result<Vec<Tag>> {
        let rows = sqlx::query("SELECT * FROM tags WHERE calendar_id = ? ORDER BY name")
            .bind(calendar_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        collect(&rows, tag_from_row)
    }

    async fn attach_tag(&self, event_id: &EventId, tag_id: &TagId) -> Result<()> {
        self.require_event(event_id).await?;
        if !exists(&self.pool, "tags", tag_id.as_str()).await? {
            return Err(Error::not_found("tag", tag_id));
        }
        sqlx::query("INSERT OR IGNORE INTO event_tags (event_id, tag_id) VALUES (?, ?)")
            .bind(event_id.as_str())
            .bind(tag_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn detach_tag(&self, event_id: &EventId, tag_id: &TagId) -> Result<()> {
        let result = sqlx::query("DELETE FROM event_tags WHERE event_id = ? AND tag_id = ?")
            .bind(event_id.as_str())
            .bind(tag_id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("event tag", format!("{event_id}/{tag_id}")));
        }
        Ok(())
    }

    async fn tags_of_event(&self, event_id: &EventId) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            "SELECT t.* FROM tags t
             JOIN event_tags et ON et.tag_id = t.id
             WHERE et.event_id = ?
             ORDER BY t.name",
        )
        .bind(event_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, tag_from_row)
    }

    async fn events_with_tag(&self, tag_id: &TagId) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT e.* FROM events e
             JOIN event_tags et ON et.event_id = e.id
             WHERE et.tag_id = ?
             ORDER BY e.start_at_ms, e.id",
        )
        .bind(tag_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, event_from_row)
    }
}

fn duplicate_tag_or(err: sqlx::Error, tag: &Tag) -> Error {
    if is_unique_violation(&err) {
        Error::DuplicateTag {
            calendar_id: tag.calendar_id.clone(),
            name: tag.name.clone(),
        }
    } else {
        err.into()
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        if !exists(&self.pool, "users", notification.user_id.as_str()).await? {
            return Err(Error::not_found("user", &notification.user_id));
        }
        sqlx::query(
            "INSERT INTO notifications (id, user_id, title, message, kind, event_id, is_read,
                                        created_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(notification.id.as_str())
        .bind(notification.user_id.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.kind.as_str())
        .bind(notification.event_id.as_ref().map(|id| id.as_str()))
        .bind(notification.is_read)
        .bind(to_ms(notification.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_notification(&self, id: &NotificationId) -> Result<Option<Notification>> {
        sqlx::query("SELECT * FROM notifications WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(notification_from_row)
            .transpose()
    }

    async fn notifications_for_user(
        &self,
        user_id: &UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT * FROM notifications
             WHERE user_id = ? AND (? = 0 OR is_read = 0)
             ORDER BY created_at_ms DESC, rowid DESC",
        )
        .bind(user_id.as_str())
        .bind(unread_only)
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, notification_from_row)
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<()> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("notification", id));
        }
        Ok(())
    }

    async fn delete_notification(&self, id: &NotificationId) -> Result<()> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("notification", id));
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::store::conformance};

    async fn make_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn sqlite_membership_rules() {
        conformance::membership_rules(&make_store().await).await;
    }

    #[tokio::test]
    async fn sqlite_half_transfer() {
        conformance::half_transfer(&make_store().await).await;
    }

    #[tokio::test]
    async fn sqlite_compare_and_set() {
        conformance::compare_and_set(&make_store().await).await;
    }

    #[tokio::test]
    async fn sqlite_due_events() {
        conformance::due_events(&make_store().await).await;
    }

    #[tokio::test]
    async fn sqlite_update_keeps_flags() {
        conformance::update_keeps_flags(&make_store().await).await;
    }

    #[tokio::test]
    async fn sqlite_calendar_cascade() {
        conformance::calendar_cascade(&make_store().await).await;
    }

    #[tokio::test]
    async fn sqlite_user_cascade() {
        conformance::user_cascade(&make_store().await).await;
    }

    #[tokio::test]
    async fn sqlite_tags() {
        conformance::tags(&make_store().await).await;
    }

    #[tokio::test]
    async fn sqlite_notifications() {
        conformance::notifications(&make_store().await).await;
    }

    #[tokio::test]
    async fn sqlite_user_profile() {
        conformance::user_profile(&make_store().await).await;
    }

    #[tokio::test]
    async fn timestamps_keep_millisecond_precision() {
        let store = make_store().await;
        let user = conformance::user("carol");
        store.insert_user(&user).await.unwrap();
        let stored = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(stored, user);
        assert_eq!(to_ms(stored.created_at), to_ms(user.created_at));
    }

    #[tokio::test]
    async fn with_pool_shares_migrated_pool() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        let store = SqliteStore::with_pool(pool);
        assert!(store.get_user(&UserId::new()).await.unwrap().is_none());
    }
}
