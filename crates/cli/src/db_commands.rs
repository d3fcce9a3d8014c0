use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::Context,
    chronos_calendar::store_sqlite::SqliteStore,
    chronos_config::ChronosConfig,
    clap::Subcommand,
    sqlx::sqlite::SqlitePoolOptions,
    tracing::info,
};

#[derive(Subcommand)]
pub enum DbAction {
    /// Delete the default database file (chronos.db and its WAL/SHM files).
    Reset,
    /// Run all pending database migrations.
    Migrate,
}

pub async fn handle_db(
    action: DbAction,
    config: &ChronosConfig,
    data_dir: &Path,
) -> anyhow::Result<()> {
    match action {
        DbAction::Reset => reset_database(config, data_dir),
        DbAction::Migrate => {
            let store = open_store(config, data_dir).await?;
            store.pool().close().await;
            println!("Migrations complete.");
            Ok(())
        },
    }
}

/// Connect to the configured database and bring its schema up to date.
pub async fn open_store(
    config: &ChronosConfig,
    data_dir: &Path,
) -> anyhow::Result<Arc<SqliteStore>> {
    if config.database.url.is_none() {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
    }
    let url = config.database.resolved_url(data_dir);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections.max(1))
        .connect(&url)
        .await
        .with_context(|| format!("failed to open database {url}"))?;
    chronos_calendar::run_migrations(&pool)
        .await
        .context("calendar migrations failed")?;
    info!(%url, "database ready");
    Ok(Arc::new(SqliteStore::with_pool(pool)))
}

fn db_files(data_dir: &Path) -> Vec<PathBuf> {
    ["chronos.db", "chronos.db-wal", "chronos.db-shm"]
        .iter()
        .map(|name| data_dir.join(name))
        .collect()
}

fn reset_database(config: &ChronosConfig, data_dir: &Path) -> anyhow::Result<()> {
    if let Some(url) = &config.database.url {
        anyhow::bail!("database.url is set to {url}; remove that database by hand");
    }

    let mut deleted = false;
    for path in db_files(data_dir) {
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to delete {}", path.display()))?;
            println!("Deleted: {}", path.display());
            deleted = true;
        }
    }

    if deleted {
        println!("Database deleted. Run `chronos db migrate` to recreate it.");
    } else {
        println!("No database files found in {}.", data_dir.display());
    }
    Ok(())
}
