//! Playback subsystem
//!
//! The waiting queue projection, the lead singer's playback session and
//! the engine loop that owns both.

pub mod engine;
pub mod events;
pub mod queue_manager;
pub mod state;

pub use engine::{Collaborators, EngineHandle, KtvEngine};
pub use events::{Command, PlayerEvent};
pub use queue_manager::WaitingQueue;
pub use state::{PlaybackSession, StopCause};
