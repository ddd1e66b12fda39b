//! Settings database operations
//!
//! Key/value accessors over the `settings` table. API keys are stored under
//! `<provider>_api_key`.

use sqlx::{Pool, Sqlite};
use memeforge_common::{Error, Result};

use crate::config::Provider;

/// API key stored for `provider`, if any
pub async fn get_api_key(db: &Pool<Sqlite>, provider: Provider) -> Result<Option<String>> {
    get_setting::<String>(db, provider.setting_key()).await
}

pub async fn set_api_key(db: &Pool<Sqlite>, provider: Provider, key: &str) -> Result<()> {
    set_setting(db, provider.setting_key(), key).await
}

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
