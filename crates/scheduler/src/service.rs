//! The notification scheduler: periodic loop, per-event state machine and
//! lifecycle.

use std::{sync::Arc, time::Duration};

use {
    chrono::{DateTime, Utc},
    chronos_calendar::{
        recurrence,
        store::{EventStore, MembershipStore, Repository, UserStore},
        types::{Event, User},
    },
    chronos_config::{SchedulerConfig, parse_duration_ms},
    tokio::{
        sync::{Mutex, RwLock},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    Error, Result,
    clock::Clock,
    error::Context,
    messages,
    sink::{Notice, NotificationSink},
};

/// Cadence and bounds for the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Time between the end of one tick and the start of the next.
    pub every: Duration,
    /// Upper bound for one dispatch. Exceeding it fails that event only.
    pub dispatch_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            every: Duration::from_secs(60),
            dispatch_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        let every = parse_duration_ms(&config.every).context("invalid scheduler.every")?;
        let timeout = parse_duration_ms(&config.dispatch_timeout)
            .context("invalid scheduler.dispatch_timeout")?;
        if every == 0 {
            return Err(Error::message("scheduler.every must be greater than zero"));
        }
        Ok(Self {
            every: Duration::from_millis(every),
            dispatch_timeout: Duration::from_millis(timeout),
        })
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Instant the tick evaluated due events against.
    pub at: Option<DateTime<Utc>>,
    /// Start notices committed.
    pub started: usize,
    /// Non-recurring events whose end was announced and committed.
    pub ended: usize,
    /// Recurring events moved to their next occurrence.
    pub rolled: usize,
    /// Events that hit an error and will be retried next tick.
    pub failed: usize,
    /// The tick did nothing because the previous one was still running.
    pub skipped: bool,
}

impl TickReport {
    #[must_use]
    pub fn handled(&self) -> usize {
        self.started + self.ended + self.rolled
    }
}

/// Snapshot of the scheduler for status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub running: bool,
    pub ticks: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
}

enum EndOutcome {
    Ended,
    Rolled,
    /// Another writer committed first.
    Lost,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct NotificationScheduler {
    events: Arc<dyn EventStore>,
    memberships: Arc<dyn MembershipStore>,
    users: Arc<dyn UserStore>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    tick_lock: Mutex<()>,
    worker: Mutex<Option<Worker>>,
    status: RwLock<SchedulerStatus>,
}

impl NotificationScheduler {
    /// Scheduler over a single backend that implements every store.
    pub fn new<R: Repository + 'static>(
        store: Arc<R>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Arc<Self> {
        Self::with_stores(store.clone(), store.clone(), store, sink, clock, settings)
    }

    pub fn with_stores(
        events: Arc<dyn EventStore>,
        memberships: Arc<dyn MembershipStore>,
        users: Arc<dyn UserStore>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            events,
            memberships,
            users,
            sink,
            clock,
            settings,
            tick_lock: Mutex::new(()),
            worker: Mutex::new(None),
            status: RwLock::new(SchedulerStatus::default()),
        })
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.settings
    }

    /// Spawn the tick loop. Calling `start` on a running scheduler is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            debug!("notification scheduler already running");
            return;
        }

        let cancel = CancellationToken::new();
        let svc = Arc::clone(self);
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            svc.run_loop(loop_cancel).await;
        });
        *worker = Some(Worker { cancel, handle });
        self.status.write().await.running = true;
        info!(
            every_ms = self.settings.every.as_millis() as u64,
            "notification scheduler started"
        );
    }

    /// Stop the loop and wait for an in-flight tick to finish.
    pub async fn stop(&self) {
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                error!(error = %e, "notification scheduler task failed");
            }
        }
        self.status.write().await.running = false;
        info!("notification scheduler stopped");
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }

    /// Run one tick now. Returns a skipped report if a tick is already in
    /// progress.
    pub async fn tick(&self) -> TickReport {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            warn!("previous tick still running, skipping");
            return TickReport {
                skipped: true,
                ..TickReport::default()
            };
        };

        let now = self.clock.now();
        let mut report = TickReport {
            at: Some(now),
            ..TickReport::default()
        };
        self.process_starts(now, &mut report).await;
        self.process_ends(now, &mut report).await;

        if report.handled() > 0 || report.failed > 0 {
            info!(
                at = %now,
                started = report.started,
                ended = report.ended,
                rolled = report.rolled,
                failed = report.failed,
                "tick finished"
            );
        } else {
            debug!(at = %now, "tick found nothing due");
        }

        let mut status = self.status.write().await;
        status.ticks += 1;
        status.last_tick_at = Some(now);
        status.last_report = Some(report.clone());
        report
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.tick().await;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.settings.every) => {},
            }
        }
        debug!("notification scheduler loop exited");
    }

    async fn process_starts(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let due = match self.events.due_for_start(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to load events due to start");
                report.failed += 1;
                return;
            },
        };

        for event in due {
            match self.announce_start(&event).await {
                Ok(true) => report.started += 1,
                Ok(false) => debug!(event_id = %event.id, "start already committed elsewhere"),
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "start notification failed");
                    report.failed += 1;
                },
            }
        }
    }

    async fn process_ends(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let due = match self.events.due_for_end(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to load events due to end");
                report.failed += 1;
                return;
            },
        };

        for event in due {
            match self.announce_end(&event).await {
                Ok(EndOutcome::Ended) => report.ended += 1,
                Ok(EndOutcome::Rolled) => report.rolled += 1,
                Ok(EndOutcome::Lost) => {
                    debug!(event_id = %event.id, "end already handled elsewhere");
                },
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "end notification failed");
                    report.failed += 1;
                },
            }
        }
    }

    /// Dispatch first, then flip the flag. A failure in between repeats the
    /// notice next tick.
    async fn announce_start(&self, event: &Event) -> Result<bool> {
        let recipient = self.recipient(event).await?;
        self.dispatch(messages::started(recipient, event)).await?;
        Ok(self.events.mark_start_notified(&event.id).await?)
    }

    async fn announce_end(&self, event: &Event) -> Result<EndOutcome> {
        let recipient = self.recipient(event).await?;

        if !event.recurrence.is_recurring() {
            self.dispatch(messages::ended(recipient, event)).await?;
            return Ok(if self.events.mark_end_notified(&event.id).await? {
                EndOutcome::Ended
            } else {
                EndOutcome::Lost
            });
        }

        // Notified flags stay as they are when rolling forward.
        let (start, end) =
            recurrence::roll_forward(event.start_time, event.end_time, event.recurrence)?;
        if !self
            .events
            .roll_forward(&event.id, event.start_time, start, end)
            .await?
        {
            return Ok(EndOutcome::Lost);
        }
        let rolled = Event {
            start_time: start,
            end_time: end,
            ..event.clone()
        };
        self.dispatch(messages::occurs_again(recipient, &rolled))
            .await?;
        Ok(EndOutcome::Rolled)
    }

    /// The calendar owner is told about every event in the calendar.
    async fn recipient(&self, event: &Event) -> Result<User> {
        let owner = self.memberships.owner_of(&event.calendar_id).await?;
        self.users
            .get_user(&owner.user_id)
            .await?
            .with_context(|| {
                format!(
                    "owner {} of calendar {} is not a registered user",
                    owner.user_id, event.calendar_id
                )
            })
    }

    async fn dispatch(&self, notice: Notice) -> Result<()> {
        let limit = self.settings.dispatch_timeout;
        match tokio::time::timeout(limit, self.sink.dispatch(&notice)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                after_ms: limit.as_millis() as u64,
            }),
        }
    }
}
