//! Durable storage: last-good prices, transfer intents, config registry.

pub mod config_repo;
pub mod intents;
pub mod last_good;

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

/// Open (creating if missing) the SQLite database and run migrations.
///
/// A single connection keeps SQLite in its single-writer comfort zone;
/// per-key write serialization is enforced above this layer by task
/// ownership, not by the pool.
pub async fn connect(db_path: &str) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite:{db_path}?mode=rwc"))
        .await
        .context("failed to connect to SQLite database")?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    info!(db_path, "store initialized");
    Ok(pool)
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}
