//! Database access for memeforge-server
//!
//! Single SQLite file in the root folder. Tables:
//! - `settings`: key/value runtime settings (API keys)
//! - `memes`: finished meme records
//! - `meme_creations`: creation pipeline state, one row per creation

pub mod creations;
pub mod memes;
pub mod retry;
pub mod settings;

pub use retry::retry_on_lock;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Initialize database connection pool
///
/// Creates the file (and parent directory) on first run, enables WAL and a
/// busy timeout, then creates tables.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let newly_created = !db_path.exists();
    let db_url = format!("sqlite://{}", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        tracing::info!("Initialized new database: {}", db_path.display());
    } else {
        tracing::info!("Opened existing database: {}", db_path.display());
    }

    init_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory pool
///
/// Every SQLite in-memory connection is a separate database, so the pool is
/// capped at one connection.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create tables if they don't exist (idempotent)
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memes (
            meme_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            template_id TEXT,
            creation_id TEXT,
            top_text TEXT NOT NULL DEFAULT '',
            bottom_text TEXT NOT NULL DEFAULT '',
            image_path TEXT NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_memes_created_at ON memes(created_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meme_creations (
            creation_id TEXT PRIMARY KEY,
            concept TEXT NOT NULL,
            style TEXT,
            status TEXT NOT NULL,
            step TEXT NOT NULL,
            progress_percent REAL NOT NULL DEFAULT 0.0,
            background_prompt TEXT,
            character_prompt TEXT,
            background_path TEXT,
            character_path TEXT,
            composite_path TEXT,
            final_path TEXT,
            top_text TEXT,
            bottom_text TEXT,
            meme_id TEXT,
            error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_meme_creations_status ON meme_creations(status)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (settings, memes, meme_creations)");

    Ok(())
}

/// Parse an RFC 3339 timestamp column
pub(crate) fn parse_timestamp(
    column: &str,
    value: &str,
) -> memeforge_common::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| {
            memeforge_common::Error::Internal(format!("Failed to parse {}: {}", column, e))
        })
}

/// Parse a UUID column
pub(crate) fn parse_uuid(column: &str, value: &str) -> memeforge_common::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(value).map_err(|e| {
        memeforge_common::Error::Internal(format!("Failed to parse {}: {}", column, e))
    })
}
