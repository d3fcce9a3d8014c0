//! Where notices go once the scheduler has decided to send them.

use std::sync::Arc;

use {
    async_trait::async_trait,
    chronos_calendar::{
        store::NotificationStore,
        types::{EventId, Notification, NotificationId, NotificationKind, User, now_ms},
    },
    chronos_config::NotificationsConfig,
    futures::future::join_all,
    tracing::info,
};

use crate::{Error, Result};

/// A message for one user about one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub recipient: User,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub event_id: Option<EventId>,
}

/// Delivers notices. Implementations must be safe to call again with the
/// same notice, since delivery is at-least-once.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn dispatch(&self, notice: &Notice) -> Result<()>;
}

/// Persists each notice as an unread in-app [`Notification`].
pub struct StoreSink {
    store: Arc<dyn NotificationStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationSink for StoreSink {
    async fn dispatch(&self, notice: &Notice) -> Result<()> {
        let notification = Notification {
            id: NotificationId::new(),
            user_id: notice.recipient.id.clone(),
            title: notice.title.clone(),
            message: notice.message.clone(),
            kind: notice.kind,
            event_id: notice.event_id.clone(),
            is_read: false,
            created_at: now_ms(),
        };
        self.store
            .insert_notification(&notification)
            .await
            .map_err(|e| Error::dispatch("storing in-app notification", e))
    }
}

/// Writes each notice as a structured log line.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn dispatch(&self, notice: &Notice) -> Result<()> {
        info!(
            recipient = %notice.recipient.id,
            email = %notice.recipient.email,
            kind = %notice.kind,
            event_id = ?notice.event_id.as_ref().map(|id| id.as_str()),
            title = %notice.title,
            "notification"
        );
        Ok(())
    }
}

/// Delivers to every inner sink. All sinks are attempted; the first error
/// in sink order is returned.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    /// Sinks enabled in the `[notifications]` section.
    pub fn from_config(config: &NotificationsConfig, store: Arc<dyn NotificationStore>) -> Self {
        let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();
        if config.in_app {
            sinks.push(Arc::new(StoreSink::new(store)));
        }
        if config.log {
            sinks.push(Arc::new(LogSink));
        }
        Self::new(sinks)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn dispatch(&self, notice: &Notice) -> Result<()> {
        let results = join_all(self.sinks.iter().map(|sink| sink.dispatch(notice))).await;
        results.into_iter().collect()
    }
}
