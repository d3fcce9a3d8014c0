/// Config schema types (database, scheduler, notification sinks).
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChronosConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub notifications: NotificationsConfig,
}

/// SQLite database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL. When unset, `<data_dir>/chronos.db` is used.
    pub url: Option<String>,
    /// Maximum pooled connections. Defaults to 5.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    /// The configured URL, or a file database inside `data_dir`.
    #[must_use]
    pub fn resolved_url(&self, data_dir: &Path) -> String {
        self.url.clone().unwrap_or_else(|| {
            format!("sqlite:{}?mode=rwc", data_dir.join("chronos.db").display())
        })
    }
}

/// Notification scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether `chronos serve` runs the scheduler. Defaults to true.
    pub enabled: bool,
    /// Interval between ticks (e.g. "1m", "30s"). Defaults to "1m".
    pub every: String,
    /// Upper bound for a single notification dispatch. Defaults to "30s".
    pub dispatch_timeout: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every: "1m".into(),
            dispatch_timeout: "30s".into(),
        }
    }
}

/// Which notification sinks the scheduler delivers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Persist in-app notification records. Defaults to true.
    pub in_app: bool,
    /// Emit one structured log line per notification. Defaults to true.
    pub log: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            in_app: true,
            log: true,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let cfg: ChronosConfig = toml::from_str("").unwrap();
        assert!(cfg.scheduler.enabled);
        assert_eq!(cfg.scheduler.every, "1m");
        assert_eq!(cfg.scheduler.dispatch_timeout, "30s");
        assert_eq!(cfg.database.max_connections, 5);
        assert!(cfg.notifications.in_app);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: ChronosConfig = toml::from_str("[scheduler]\nevery = \"30s\"\n").unwrap();
        assert_eq!(cfg.scheduler.every, "30s");
        assert_eq!(cfg.scheduler.dispatch_timeout, "30s");
    }

    #[test]
    fn resolved_url_falls_back_to_data_dir() {
        let db = DatabaseConfig::default();
        let url = db.resolved_url(Path::new("/var/lib/chronos"));
        assert_eq!(url, "sqlite:/var/lib/chronos/chronos.db?mode=rwc");

        let db = DatabaseConfig {
            url: Some("sqlite::memory:".into()),
            ..Default::default()
        };
        assert_eq!(db.resolved_url(Path::new("/ignored")), "sqlite::memory:");
    }
}
