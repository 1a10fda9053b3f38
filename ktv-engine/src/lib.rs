//! # KTV Engine Library (ktv-engine)
//!
//! Karaoke/chorus playback synchronization for one room.
//!
//! **Purpose:** Keep a shared waiting queue, drive the lead singer's player
//! through load/start/pause/resume/stop, advance through the queue, and carry
//! the lead singer's pitch and score to every peer inside audio frames.
//!
//! **Architecture:** One engine actor per room owns all mutable state and
//! consumes a single message stream (commands, player callbacks, queue and
//! metadata notifications). The audio thread only reads an atomically
//! swapped snapshot.

pub mod catalog;
pub mod config;
pub mod effects;
pub mod error;
pub mod memory;
pub mod playback;
pub mod ports;
pub mod room;
pub mod state;
pub mod telemetry;

pub use error::{Error, Result};
pub use playback::{EngineHandle, KtvEngine};
pub use state::SharedState;
