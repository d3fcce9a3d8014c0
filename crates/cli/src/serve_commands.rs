use std::{path::Path, sync::Arc};

use {
    anyhow::Context,
    chrono::{DateTime, Utc},
    chronos_calendar::store_sqlite::SqliteStore,
    chronos_config::ChronosConfig,
    chronos_scheduler::{
        Clock, FanoutSink, ManualClock, NotificationScheduler, SchedulerSettings, SystemClock,
        TickReport,
    },
    tracing::{info, warn},
};

use crate::db_commands::open_store;

fn build_scheduler(
    config: &ChronosConfig,
    store: Arc<SqliteStore>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<NotificationScheduler>> {
    let settings =
        SchedulerSettings::from_config(&config.scheduler).context("invalid scheduler settings")?;
    let sink = FanoutSink::from_config(&config.notifications, store.clone());
    if sink.is_empty() {
        warn!("all notification sinks are disabled; notices will be dropped");
    }
    Ok(NotificationScheduler::new(
        store,
        Arc::new(sink),
        clock,
        settings,
    ))
}

/// Run the scheduler until ctrl-c.
pub async fn serve(config: &ChronosConfig, data_dir: &Path) -> anyhow::Result<()> {
    let store = open_store(config, data_dir).await?;
    if !config.scheduler.enabled {
        info!("scheduler disabled in config; nothing to do");
        return Ok(());
    }

    let scheduler = build_scheduler(config, store.clone(), Arc::new(SystemClock))?;
    scheduler.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    scheduler.stop().await;
    let status = scheduler.status().await;
    info!(ticks = status.ticks, "scheduler finished");
    store.pool().close().await;
    Ok(())
}

/// Run one tick, optionally pretending it is `at`.
pub async fn tick(
    config: &ChronosConfig,
    data_dir: &Path,
    at: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let store = open_store(config, data_dir).await?;
    let clock: Arc<dyn Clock> = match at {
        Some(at) => Arc::new(ManualClock::new(at)),
        None => Arc::new(SystemClock),
    };
    let scheduler = build_scheduler(config, store.clone(), clock)?;
    let report = scheduler.tick().await;
    println!("{}", describe(&report));
    store.pool().close().await;
    Ok(())
}

fn describe(report: &TickReport) -> String {
    let at = report
        .at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "-".into());
    format!(
        "tick at {at}: {} started, {} ended, {} rolled forward, {} failed",
        report.started, report.ended, report.rolled, report.failed
    )
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::TimeZone,
        chronos_calendar::{
            Services,
            store::NotificationStore,
            types::{NewCalendar, NewEvent, NewUser},
        },
        tempfile::TempDir,
    };

    #[tokio::test]
    async fn replayed_tick_writes_in_app_notices() {
        let temp = TempDir::new().unwrap();
        let config = ChronosConfig::default();
        let store = open_store(&config, temp.path()).await.unwrap();

        let services = Services::new(store.clone());
        let owner = services
            .users
            .register_user(NewUser {
                id: None,
                login: "ops".into(),
                email: "ops@example.com".into(),
                verified: true,
            })
            .await
            .unwrap();
        let cal = services
            .calendars
            .create_calendar(&owner.id, NewCalendar {
                title: "Ops".into(),
                description: None,
            })
            .await
            .unwrap();
        services
            .events
            .create_event(&owner.id, &cal.id, NewEvent {
                title: "deploy".into(),
                description: None,
                start_time: Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
                end_time: Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
                event_type: Default::default(),
                recurrence: Default::default(),
            })
            .await
            .unwrap();

        let at = Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap();
        let scheduler =
            build_scheduler(&config, store.clone(), Arc::new(ManualClock::new(at))).unwrap();
        let report = scheduler.tick().await;
        assert_eq!(
            describe(&report),
            "tick at 2025-06-01T08:30:00+00:00: 1 started, 0 ended, 0 rolled forward, 0 failed"
        );

        let notes = store.notifications_for_user(&owner.id, false).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Event started: deploy");
    }

    #[test]
    fn bad_interval_is_reported() {
        let mut config = ChronosConfig::default();
        config.scheduler.every = "whenever".into();
        assert!(SchedulerSettings::from_config(&config.scheduler).is_err());
    }
}
