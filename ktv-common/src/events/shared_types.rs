//! Shared type definitions for event data

use serde::{Deserialize, Serialize};

/// Player mix levels, each in `0..=100`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volumes {
    /// Backing music level
    pub music: u8,
    /// Local vocal (ear monitor / capture) level
    pub vocal: u8,
}

impl Volumes {
    pub const MAX: u8 = 100;

    /// Builds volumes, clamping both levels to `0..=100`
    pub fn new(music: u8, vocal: u8) -> Self {
        Self {
            music: music.min(Self::MAX),
            vocal: vocal.min(Self::MAX),
        }
    }
}

impl Default for Volumes {
    fn default() -> Self {
        Self {
            music: 50,
            vocal: 100,
        }
    }
}
