//! Configuration loading, validation and env substitution.
//!
//! Config files: `chronos.toml`, `chronos.yaml`, `chronos.yml` or `chronos.json`
//! Searched in `./` then `~/.config/chronos/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod duration;
pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    duration::parse_duration_ms,
    loader::{
        apply_env_overrides, config_dir, data_dir, discover_and_load, find_config_file,
        load_config,
    },
    schema::{ChronosConfig, DatabaseConfig, NotificationsConfig, SchedulerConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
