//! Sending, reading and dismissing in-app notifications.

use std::{ops::RangeInclusive, sync::Arc};

use tracing::{debug, warn};

use crate::{
    Error, Result,
    paging::{ListOptions, Page},
    store::{NotificationStore, UserStore},
    types::{NewNotification, Notification, NotificationId, UserId, now_ms},
};

const TITLE_CHARS: RangeInclusive<usize> = 3..=100;
const MESSAGE_CHARS: RangeInclusive<usize> = 5..=1000;

fn check_length(field: &str, value: &str, allowed: RangeInclusive<usize>) -> Result<()> {
    let chars = value.trim().chars().count();
    if !allowed.contains(&chars) {
        return Err(Error::bad_request(format!(
            "notification {field} must be {} to {} characters long",
            allowed.start(),
            allowed.end()
        )));
    }
    Ok(())
}

fn build(new: NewNotification) -> Notification {
    Notification {
        id: NotificationId::new(),
        user_id: new.user_id,
        title: new.title,
        message: new.message,
        kind: new.kind,
        event_id: new.event_id,
        is_read: false,
        created_at: now_ms(),
    }
}

/// Side-channel notices raised by other services. Delivery never fails the
/// operation that triggered it.
#[derive(Clone)]
pub(crate) struct Notifier {
    notifications: Arc<dyn NotificationStore>,
}

impl Notifier {
    pub(crate) fn new(notifications: Arc<dyn NotificationStore>) -> Self {
        Self { notifications }
    }

    pub(crate) async fn send(&self, new: NewNotification) {
        let notification = build(new);
        match self.notifications.insert_notification(&notification).await {
            Ok(()) => debug!(
                user_id = %notification.user_id,
                kind = %notification.kind,
                "notification sent"
            ),
            Err(e) => warn!(
                user_id = %notification.user_id,
                kind = %notification.kind,
                error = %e,
                "notification not stored"
            ),
        }
    }
}

pub struct NotificationService {
    notifications: Arc<dyn NotificationStore>,
    users: Arc<dyn UserStore>,
}

impl NotificationService {
    pub fn new(notifications: Arc<dyn NotificationStore>, users: Arc<dyn UserStore>) -> Self {
        Self {
            notifications,
            users,
        }
    }

    /// Store a notification for an existing user.
    pub async fn create_notification(&self, new: NewNotification) -> Result<Notification> {
        check_length("title", &new.title, TITLE_CHARS)?;
        check_length("message", &new.message, MESSAGE_CHARS)?;
        if self.users.get_user(&new.user_id).await?.is_none() {
            return Err(Error::not_found("user", &new.user_id));
        }
        let notification = build(new);
        self.notifications
            .insert_notification(&notification)
            .await?;
        debug!(
            id = %notification.id,
            user_id = %notification.user_id,
            kind = %notification.kind,
            "notification created"
        );
        Ok(notification)
    }

    /// The user's notifications, newest first unless `options` reverses
    /// them. Search matches the title.
    pub async fn notifications_for(
        &self,
        user_id: &UserId,
        unread_only: bool,
        options: &ListOptions,
    ) -> Result<Page<Notification>> {
        let all = self
            .notifications
            .notifications_for_user(user_id, unread_only)
            .await?;
        Ok(options.apply(all, |n| n.title.as_str()))
    }

    async fn owned(&self, caller: &UserId, id: &NotificationId) -> Result<Notification> {
        let notification = self
            .notifications
            .get_notification(id)
            .await?
            .ok_or_else(|| Error::not_found("notification", id))?;
        if &notification.user_id != caller {
            return Err(Error::forbidden(format!(
                "notification {id} belongs to another user"
            )));
        }
        Ok(notification)
    }

    pub async fn mark_read(&self, caller: &UserId, id: &NotificationId) -> Result<()> {
        self.owned(caller, id).await?;
        self.notifications.mark_read(id).await
    }

    pub async fn delete_notification(&self, caller: &UserId, id: &NotificationId) -> Result<()> {
        self.owned(caller, id).await?;
        self.notifications.delete_notification(id).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{store::conformance, store_memory::InMemoryStore, types::NotificationKind},
    };

    #[tokio::test]
    async fn only_recipient_touches_notification() {
        let store = Arc::new(InMemoryStore::new());
        let alice = conformance::user("alice");
        let bob = conformance::user("bob");
        store.insert_user(&alice).await.unwrap();
        store.insert_user(&bob).await.unwrap();
        let note = Notification {
            id: NotificationId::new(),
            user_id: alice.id.clone(),
            title: "Event ended: sync".into(),
            message: "Event \"sync\" ends right now.".into(),
            kind: NotificationKind::EventReminder,
            event_id: None,
            is_read: false,
            created_at: conformance::ts(11, 0),
        };
        store.insert_notification(&note).await.unwrap();
        let service = NotificationService::new(store.clone(), store.clone());
        let all = ListOptions::default();

        assert!(
            service
                .notifications_for(&bob.id, false, &all)
                .await
                .unwrap()
                .is_empty()
        );
        let err = service.mark_read(&bob.id, &note.id).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
        let err = service
            .delete_notification(&bob.id, &note.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));

        service.mark_read(&alice.id, &note.id).await.unwrap();
        assert!(
            service
                .notifications_for(&alice.id, true, &all)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            service
                .notifications_for(&alice.id, false, &all)
                .await
                .unwrap()
                .total,
            1
        );

        service
            .delete_notification(&alice.id, &note.id)
            .await
            .unwrap();
        let err = service.mark_read(&alice.id, &note.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    fn invitation(user_id: &UserId, title: &str) -> NewNotification {
        NewNotification {
            user_id: user_id.clone(),
            title: title.into(),
            message: "You were added to \"Team\" as visitor.".into(),
            kind: NotificationKind::EventInvitation,
            event_id: None,
        }
    }

    #[tokio::test]
    async fn create_validates_and_stores() {
        let store = Arc::new(InMemoryStore::new());
        let alice = conformance::user("alice");
        store.insert_user(&alice).await.unwrap();
        let service = NotificationService::new(store.clone(), store.clone());

        let err = service
            .create_notification(invitation(&alice.id, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
        let mut short = invitation(&alice.id, "Calendar shared: Team");
        short.message = "ok".into();
        let err = service.create_notification(short).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
        let err = service
            .create_notification(invitation(&UserId::new(), "Calendar shared: Team"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let created = service
            .create_notification(invitation(&alice.id, "Calendar shared: Team"))
            .await
            .unwrap();
        assert!(!created.is_read);
        assert_eq!(created.kind, NotificationKind::EventInvitation);
        let stored = store.get_notification(&created.id).await.unwrap().unwrap();
        assert_eq!(stored, created);
    }

    #[tokio::test]
    async fn listing_searches_and_pages() {
        let store = Arc::new(InMemoryStore::new());
        let alice = conformance::user("alice");
        store.insert_user(&alice).await.unwrap();
        let titles = [
            (0, "Event started: a"),
            (1, "Event ended: a"),
            (2, "Event started: b"),
        ];
        for (minute, title) in titles {
            store
                .insert_notification(&Notification {
                    id: NotificationId::new(),
                    user_id: alice.id.clone(),
                    title: title.into(),
                    message: "body text".into(),
                    kind: NotificationKind::EventReminder,
                    event_id: None,
                    is_read: false,
                    created_at: conformance::ts(9, minute),
                })
                .await
                .unwrap();
        }
        let service = NotificationService::new(store.clone(), store.clone());

        let started = service
            .notifications_for(&alice.id, false, &ListOptions::search("event started"))
            .await
            .unwrap();
        assert_eq!(started.total, 2);
        assert_eq!(started.items[0].title, "Event started: b");

        let oldest = service
            .notifications_for(&alice.id, false, &ListOptions {
                descending: true,
                ..ListOptions::paged(1, 1)
            })
            .await
            .unwrap();
        assert_eq!(oldest.total, 3);
        assert_eq!(oldest.items.len(), 1);
        assert_eq!(oldest.items[0].title, "Event started: a");
    }
}
