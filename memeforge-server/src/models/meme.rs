//! Stored meme record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MemeKind;

/// A finished meme image persisted in the file store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meme {
    pub meme_id: Uuid,
    pub kind: MemeKind,
    pub title: String,
    /// Catalog template id (template memes)
    pub template_id: Option<String>,
    /// Creation that produced it (generated memes)
    pub creation_id: Option<Uuid>,
    pub top_text: String,
    pub bottom_text: String,
    /// Relative to the file store root
    pub image_path: String,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
}
