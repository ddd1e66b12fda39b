//! Meme record database operations

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use memeforge_common::{Error, Result};

use super::{parse_timestamp, parse_uuid};
use crate::models::{Meme, MemeKind};

pub async fn insert_meme(pool: &SqlitePool, meme: &Meme) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO memes (
            meme_id, kind, title, template_id, creation_id,
            top_text, bottom_text, image_path, width, height, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(meme.meme_id.to_string())
    .bind(meme.kind.as_str())
    .bind(&meme.title)
    .bind(&meme.template_id)
    .bind(meme.creation_id.map(|id| id.to_string()))
    .bind(&meme.top_text)
    .bind(&meme.bottom_text)
    .bind(&meme.image_path)
    .bind(meme.width as i64)
    .bind(meme.height as i64)
    .bind(meme.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_meme(pool: &SqlitePool, meme_id: Uuid) -> Result<Option<Meme>> {
    let row = sqlx::query("SELECT * FROM memes WHERE meme_id = ?")
        .bind(meme_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| meme_from_row(&r)).transpose()
}

/// Newest first, optionally filtered by kind
pub async fn list_memes(
    pool: &SqlitePool,
    kind: Option<MemeKind>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Meme>> {
    let rows = match kind {
        Some(kind) => {
            sqlx::query(
                "SELECT * FROM memes WHERE kind = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(kind.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query("SELECT * FROM memes ORDER BY created_at DESC LIMIT ? OFFSET ?")
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
        }
    };

    rows.iter().map(meme_from_row).collect()
}

/// Returns true if a row was removed
pub async fn delete_meme(pool: &SqlitePool, meme_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM memes WHERE meme_id = ?")
        .bind(meme_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

fn meme_from_row(row: &SqliteRow) -> Result<Meme> {
    let meme_id: String = row.get("meme_id");
    let kind: String = row.get("kind");
    let creation_id: Option<String> = row.get("creation_id");
    let created_at: String = row.get("created_at");

    Ok(Meme {
        meme_id: parse_uuid("meme_id", &meme_id)?,
        kind: kind.parse::<MemeKind>().map_err(Error::Internal)?,
        title: row.get("title"),
        template_id: row.get("template_id"),
        creation_id: creation_id
            .map(|id| parse_uuid("creation_id", &id))
            .transpose()?,
        top_text: row.get("top_text"),
        bottom_text: row.get("bottom_text"),
        image_path: row.get("image_path"),
        width: row.get::<i64, _>("width") as u32,
        height: row.get::<i64, _>("height") as u32,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}
