//! # KTV Common Library
//!
//! Shared code for the karaoke room engine and its tools:
//! - Room data model (queue entries, catalog assets, play tokens, lyrics)
//! - Event types (KtvEvent enum) and the EventBus
//! - Configuration loading
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod models;

pub use error::{Error, Result};
pub use models::{MusicAsset, PlayToken, QueueEntry, UserId};
