//! Karaoke engine
//!
//! One engine instance per active room. It is the single owner of the
//! playback session and the queue projection; everything else talks to it
//! through an [`EngineHandle`].
//!
//! **Module Organization:**
//! - `core`: struct, construction, message loop, teardown, publishing
//! - `handle`: cloneable command/notification sender
//! - `playback`: player state machine and advance-to-next
//! - `queue`: queue commands and change notifications
//! - `metadata`: room flag commands and notifications

mod core;
mod handle;
mod metadata;
mod playback;
mod queue;

pub use self::core::{Collaborators, KtvEngine};
pub use handle::EngineHandle;
pub use playback::{MAX_PITCH_SHIFT, MIN_PITCH_SHIFT};
