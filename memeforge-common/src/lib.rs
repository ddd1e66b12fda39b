//! # MemeForge Common Library
//!
//! Shared code for the MemeForge service crates:
//! - Error type used by database and configuration code
//! - Event types (`MemeEvent`) and the broadcast `EventBus`
//! - Bootstrap configuration loading and root folder resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
