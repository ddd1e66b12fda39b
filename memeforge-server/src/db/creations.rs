//! Meme creation state persistence

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use memeforge_common::{Error, Result};

use super::{parse_timestamp, parse_uuid, retry_on_lock};
use crate::models::{Caption, CreationStatus, CreationStep, MemeCreation};

const SELECT_COLUMNS: &str = r#"
    SELECT creation_id, concept, style, status, step, progress_percent,
           background_prompt, character_prompt, background_path, character_path,
           composite_path, final_path, top_text, bottom_text, meme_id, error,
           created_at, updated_at, completed_at
    FROM meme_creations
"#;

/// Save (insert or update) a creation
///
/// Wrapped in `retry_on_lock`: the orchestrator writes after every step while
/// handlers read concurrently. A row that is already terminal is left as is.
pub async fn save_creation(pool: &SqlitePool, creation: &MemeCreation) -> Result<()> {
    let creation_id = creation.creation_id.to_string();
    let status = creation.status.as_str();
    let step = creation.step.as_str();
    let (top_text, bottom_text) = match &creation.caption {
        Some(c) => (Some(c.top_text.clone()), Some(c.bottom_text.clone())),
        None => (None, None),
    };
    let meme_id = creation.meme_id.map(|id| id.to_string());
    let created_at = creation.created_at.to_rfc3339();
    let updated_at = creation.updated_at.to_rfc3339();
    let completed_at = creation.completed_at.map(|dt| dt.to_rfc3339());

    retry_on_lock("save_creation", super::retry::DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO meme_creations (
                creation_id, concept, style, status, step, progress_percent,
                background_prompt, character_prompt, background_path, character_path,
                composite_path, final_path, top_text, bottom_text, meme_id, error,
                created_at, updated_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(creation_id) DO UPDATE SET
                status = excluded.status,
                step = excluded.step,
                progress_percent = excluded.progress_percent,
                background_prompt = excluded.background_prompt,
                character_prompt = excluded.character_prompt,
                background_path = excluded.background_path,
                character_path = excluded.character_path,
                composite_path = excluded.composite_path,
                final_path = excluded.final_path,
                top_text = excluded.top_text,
                bottom_text = excluded.bottom_text,
                meme_id = excluded.meme_id,
                error = excluded.error,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at
            WHERE meme_creations.status IN ('pending', 'in_progress')
            "#,
        )
        .bind(&creation_id)
        .bind(&creation.concept)
        .bind(&creation.style)
        .bind(status)
        .bind(step)
        .bind(creation.progress_percent)
        .bind(&creation.background_prompt)
        .bind(&creation.character_prompt)
        .bind(&creation.background_path)
        .bind(&creation.character_path)
        .bind(&creation.composite_path)
        .bind(&creation.final_path)
        .bind(&top_text)
        .bind(&bottom_text)
        .bind(&meme_id)
        .bind(&creation.error)
        .bind(&created_at)
        .bind(&updated_at)
        .bind(&completed_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

/// Load a creation by id
pub async fn load_creation(pool: &SqlitePool, creation_id: Uuid) -> Result<Option<MemeCreation>> {
    let row = sqlx::query(&format!("{} WHERE creation_id = ?", SELECT_COLUMNS))
        .bind(creation_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| creation_from_row(&r)).transpose()
}

/// Most recent creations first
pub async fn list_creations(pool: &SqlitePool, limit: i64) -> Result<Vec<MemeCreation>> {
    let rows = sqlx::query(&format!("{} ORDER BY created_at DESC LIMIT ?", SELECT_COLUMNS))
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter().map(creation_from_row).collect()
}

/// Creations that have not reached a terminal state
pub async fn count_active_creations(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM meme_creations WHERE status IN ('pending', 'in_progress')",
    )
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Fail creations left running by a previous process
///
/// The pipeline runs in a task that dies with the process, so a non-terminal
/// row found at startup will never progress.
pub async fn mark_interrupted_creations(pool: &SqlitePool) -> Result<usize> {
    let now = chrono::Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE meme_creations
        SET status = 'failed',
            error = 'interrupted by server restart',
            updated_at = ?,
            completed_at = ?
        WHERE status IN ('pending', 'in_progress')
        "#,
    )
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

/// Cancel a creation that has no running pipeline
///
/// Returns false when the row is missing or already terminal.
pub async fn cancel_orphaned_creation(pool: &SqlitePool, creation_id: Uuid) -> Result<bool> {
    let now = chrono::Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE meme_creations
        SET status = 'cancelled', updated_at = ?, completed_at = ?
        WHERE creation_id = ? AND status IN ('pending', 'in_progress')
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(creation_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Direct status update used when the regular save path failed
pub async fn force_fail(pool: &SqlitePool, creation_id: Uuid, error: &str) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE meme_creations
        SET status = 'failed', error = ?, updated_at = ?, completed_at = ?
        WHERE creation_id = ? AND status IN ('pending', 'in_progress')
        "#,
    )
    .bind(error)
    .bind(&now)
    .bind(&now)
    .bind(creation_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

fn creation_from_row(row: &SqliteRow) -> Result<MemeCreation> {
    let creation_id: String = row.get("creation_id");
    let status: String = row.get("status");
    let step: String = row.get("step");
    let top_text: Option<String> = row.get("top_text");
    let bottom_text: Option<String> = row.get("bottom_text");
    let meme_id: Option<String> = row.get("meme_id");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let completed_at: Option<String> = row.get("completed_at");

    let caption = match (top_text, bottom_text) {
        (None, None) => None,
        (top, bottom) => Some(Caption::new(
            top.unwrap_or_default(),
            bottom.unwrap_or_default(),
        )),
    };

    Ok(MemeCreation {
        creation_id: parse_uuid("creation_id", &creation_id)?,
        concept: row.get("concept"),
        style: row.get("style"),
        status: status.parse::<CreationStatus>().map_err(Error::Internal)?,
        step: step.parse::<CreationStep>().map_err(Error::Internal)?,
        progress_percent: row.get("progress_percent"),
        background_prompt: row.get("background_prompt"),
        character_prompt: row.get("character_prompt"),
        background_path: row.get("background_path"),
        character_path: row.get("character_path"),
        composite_path: row.get("composite_path"),
        final_path: row.get("final_path"),
        caption,
        meme_id: meme_id.map(|id| parse_uuid("meme_id", &id)).transpose()?,
        error: row.get("error"),
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        completed_at: completed_at
            .map(|s| parse_timestamp("completed_at", &s))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let pool = init_memory_pool().await.unwrap();

        let mut creation = MemeCreation::new("dog in a meeting".to_string(), Some("comic".to_string()));
        creation.begin();
        creation.advance_to(CreationStep::Caption);
        creation.background_path = Some("creations/a/background.png".to_string());
        creation.caption = Some(Caption::new("WHEN THE MEETING", "COULD HAVE BEEN AN EMAIL"));
        save_creation(&pool, &creation).await.unwrap();

        let loaded = load_creation(&pool, creation.creation_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CreationStatus::InProgress);
        assert_eq!(loaded.step, CreationStep::Caption);
        assert_eq!(loaded.style.as_deref(), Some("comic"));
        assert_eq!(loaded.background_path, creation.background_path);
        assert_eq!(loaded.caption, creation.caption);
        assert_eq!(loaded.progress_percent, 70.0);
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_row() {
        let pool = init_memory_pool().await.unwrap();

        let mut creation = MemeCreation::new("concept".to_string(), None);
        save_creation(&pool, &creation).await.unwrap();

        creation.begin();
        creation.fail("boom");
        save_creation(&pool, &creation).await.unwrap();

        let all = list_creations(&pool, 10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, CreationStatus::Failed);
        assert_eq!(all[0].error.as_deref(), Some("boom"));
        assert!(all[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let pool = init_memory_pool().await.unwrap();
        assert!(load_creation(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interrupted_cleanup() {
        let pool = init_memory_pool().await.unwrap();

        let pending = MemeCreation::new("a".to_string(), None);
        let mut running = MemeCreation::new("b".to_string(), None);
        running.begin();
        let mut done = MemeCreation::new("c".to_string(), None);
        done.begin();
        done.complete(Uuid::new_v4(), "memes/c.png".to_string());

        for c in [&pending, &running, &done] {
            save_creation(&pool, c).await.unwrap();
        }

        assert_eq!(count_active_creations(&pool).await.unwrap(), 2);
        assert_eq!(mark_interrupted_creations(&pool).await.unwrap(), 2);
        assert_eq!(count_active_creations(&pool).await.unwrap(), 0);
        // second sweep finds nothing
        assert_eq!(mark_interrupted_creations(&pool).await.unwrap(), 0);

        let reloaded = load_creation(&pool, running.creation_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, CreationStatus::Failed);
        assert_eq!(reloaded.error.as_deref(), Some("interrupted by server restart"));

        let untouched = load_creation(&pool, done.creation_id).await.unwrap().unwrap();
        assert_eq!(untouched.status, CreationStatus::Completed);
    }

    #[tokio::test]
    async fn test_stale_copy_does_not_overwrite_completed_row() {
        let pool = init_memory_pool().await.unwrap();

        let mut creation = MemeCreation::new("dog learns rust".to_string(), None);
        creation.begin();
        save_creation(&pool, &creation).await.unwrap();

        let mut stale = load_creation(&pool, creation.creation_id).await.unwrap().unwrap();

        let meme_id = Uuid::new_v4();
        creation.complete(meme_id, "memes/done.png".to_string());
        save_creation(&pool, &creation).await.unwrap();

        assert!(stale.cancel());
        save_creation(&pool, &stale).await.unwrap();

        let reloaded = load_creation(&pool, creation.creation_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, CreationStatus::Completed);
        assert_eq!(reloaded.meme_id, Some(meme_id));
        assert_eq!(reloaded.final_path.as_deref(), Some("memes/done.png"));
    }

    #[tokio::test]
    async fn test_cancel_orphaned_creation() {
        let pool = init_memory_pool().await.unwrap();

        let mut running = MemeCreation::new("a".to_string(), None);
        running.begin();
        save_creation(&pool, &running).await.unwrap();
        let mut done = MemeCreation::new("b".to_string(), None);
        done.begin();
        done.complete(Uuid::new_v4(), "memes/b.png".to_string());
        save_creation(&pool, &done).await.unwrap();

        assert!(cancel_orphaned_creation(&pool, running.creation_id).await.unwrap());
        let reloaded = load_creation(&pool, running.creation_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, CreationStatus::Cancelled);
        assert!(reloaded.completed_at.is_some());

        // already terminal, or unknown
        assert!(!cancel_orphaned_creation(&pool, running.creation_id).await.unwrap());
        assert!(!cancel_orphaned_creation(&pool, done.creation_id).await.unwrap());
        assert!(!cancel_orphaned_creation(&pool, Uuid::new_v4()).await.unwrap());

        let untouched = load_creation(&pool, done.creation_id).await.unwrap().unwrap();
        assert_eq!(untouched.status, CreationStatus::Completed);
    }

    #[tokio::test]
    async fn test_force_fail_skips_terminal_rows() {
        let pool = init_memory_pool().await.unwrap();

        let mut done = MemeCreation::new("x".to_string(), None);
        done.begin();
        done.cancel();
        save_creation(&pool, &done).await.unwrap();

        force_fail(&pool, done.creation_id, "late").await.unwrap();
        let reloaded = load_creation(&pool, done.creation_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, CreationStatus::Cancelled);
    }
}
