//! Background task that tells calendar owners when their events start and
//! end, and rolls recurring events forward to their next occurrence.
//!
//! Delivery is at-least-once: a notice is dispatched before the event's
//! notified flag is committed, so a crash in between repeats the notice on
//! the next tick. Moving a recurring event forward is committed before
//! its notice goes out, so that one notice is sent at most once.

pub mod clock;
pub mod error;
pub mod messages;
pub mod service;
pub mod sink;

pub use {
    clock::{Clock, ManualClock, SystemClock},
    error::{Error, Result},
    service::{NotificationScheduler, SchedulerSettings, SchedulerStatus, TickReport},
    sink::{FanoutSink, LogSink, Notice, NotificationSink, StoreSink},
};
