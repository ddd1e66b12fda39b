//! Data models for memeforge-server

pub mod catalog;
pub mod creation;
pub mod meme;

pub use catalog::{GifEntry, MemeTemplate};
pub use creation::{Caption, MemeCreation};
pub use meme::Meme;
pub use memeforge_common::events::{CreationStatus, CreationStep, MemeKind};
