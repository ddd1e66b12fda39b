//! HTTP, WebSocket and SSE surface

pub mod catalog;
pub mod creations;
pub mod health;
pub mod memes;
pub mod settings;
pub mod sse;
pub mod ui;
pub mod ws;

pub use catalog::catalog_routes;
pub use creations::creation_routes;
pub use health::health_routes;
pub use memes::meme_routes;
pub use settings::settings_routes;
pub use ui::ui_routes;
