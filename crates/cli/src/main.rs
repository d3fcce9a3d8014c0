mod config_commands;
mod db_commands;
mod serve_commands;

use std::path::PathBuf;

use {
    chrono::{DateTime, Utc},
    chronos_config::ChronosConfig,
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "chronos", about = "Chronos: shared calendars with event notifications")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of the discovered one.
    #[arg(long, global = true, env = "CHRONOS_CONFIG")]
    config: Option<PathBuf>,

    /// Custom data directory (overrides the default data dir).
    #[arg(long, global = true, env = "CHRONOS_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the notification scheduler (default when no subcommand is provided).
    Serve,
    /// Run a single scheduler tick and print what it did.
    Tick {
        /// Evaluate due events as of this RFC 3339 instant instead of now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Database management (migrate, reset).
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// An explicit `--config` must load; discovery falls back to defaults.
fn load_config(cli: &Cli) -> anyhow::Result<ChronosConfig> {
    match &cli.config {
        Some(path) => {
            let mut config = chronos_config::load_config(path)?;
            chronos_config::apply_env_overrides(&mut config);
            Ok(config)
        },
        None => Ok(chronos_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "chronos starting");

    let config = load_config(&cli)?;
    let data_dir = cli.data_dir.clone().unwrap_or_else(chronos_config::data_dir);

    match cli.command {
        None | Some(Commands::Serve) => serve_commands::serve(&config, &data_dir).await,
        Some(Commands::Tick { at }) => serve_commands::tick(&config, &data_dir, at).await,
        Some(Commands::Db { action }) => db_commands::handle_db(action, &config, &data_dir).await,
        Some(Commands::Config { action }) => {
            config_commands::handle_config(action, &config, cli.config.as_deref())
        },
    }
}
