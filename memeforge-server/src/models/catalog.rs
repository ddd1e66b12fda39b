//! Catalog entries served from the template and GIF caches

use serde::{Deserialize, Serialize};

/// Blank meme template from the template provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemeTemplate {
    pub id: String,
    pub name: String,
    /// Full-size image URL
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Number of text boxes the template was designed for
    pub box_count: u32,
}

/// Animated GIF from the GIF provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GifEntry {
    pub id: String,
    pub title: String,
    pub url: String,
    pub preview_url: String,
    pub width: u32,
    pub height: u32,
}
