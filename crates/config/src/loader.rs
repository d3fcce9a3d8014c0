use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::ChronosConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "chronos.toml",
    "chronos.yaml",
    "chronos.yml",
    "chronos.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<ChronosConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./chronos.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/chronos/chronos.{toml,yaml,yml,json}` (user-global)
///
/// Returns `ChronosConfig::default()` if no config file is found or the file
/// fails to parse. Environment overrides are applied either way.
pub fn discover_and_load() -> ChronosConfig {
    let mut config = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                ChronosConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        ChronosConfig::default()
    };
    apply_env_overrides(&mut config);
    config
}

/// Apply `CHRONOS_*` environment overrides on top of a loaded config.
///
/// - `CHRONOS_DATABASE_URL` → `database.url`
/// - `CHRONOS_SCHEDULER_EVERY` → `scheduler.every`
/// - `CHRONOS_SCHEDULER_ENABLED` → `scheduler.enabled` (`true`/`false`)
pub fn apply_env_overrides(config: &mut ChronosConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut ChronosConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("CHRONOS_DATABASE_URL") {
        config.database.url = Some(url);
    }
    if let Some(every) = lookup("CHRONOS_SCHEDULER_EVERY") {
        config.scheduler.every = every;
    }
    if let Some(enabled) = lookup("CHRONOS_SCHEDULER_ENABLED") {
        match enabled.trim().parse::<bool>() {
            Ok(value) => config.scheduler.enabled = value,
            Err(_) => warn!(value = %enabled, "ignoring invalid CHRONOS_SCHEDULER_ENABLED"),
        }
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/chronos/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "chronos").map(|d| d.config_dir().to_path_buf())
}

/// Returns the data directory holding the default SQLite database.
///
/// Falls back to `./` when no home directory can be determined.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "chronos")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// The config format implied by the file extension. No extension means TOML.
pub(crate) fn config_format(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ChronosConfig> {
    let ext = config_format(path);

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
