//! Playback-related type definitions

use serde::{Deserialize, Serialize};

/// Lead singer's player state as seen by the room
///
/// `Idle` means no song is loaded. A session moves
/// `Idle -> Start -> (Pause <-> Resume) -> Stop` and from `Stop` either back
/// to `Idle` or on to the next song's `Start`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Idle,
    Start,
    Pause,
    Resume,
    Stop,
}

impl PlaybackState {
    /// Audio is audibly playing (fresh start or resumed)
    pub fn is_playing(self) -> bool {
        matches!(self, PlaybackState::Start | PlaybackState::Resume)
    }

    /// A song is loaded in the player and has not stopped
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PlaybackState::Start | PlaybackState::Pause | PlaybackState::Resume
        )
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Start => write!(f, "start"),
            PlaybackState::Pause => write!(f, "pause"),
            PlaybackState::Resume => write!(f, "resume"),
            PlaybackState::Stop => write!(f, "stop"),
        }
    }
}

/// Which rendition of the track the player outputs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioTrack {
    /// Original recording with the lead vocal
    Original,
    /// Backing track only
    #[default]
    Accompaniment,
}

impl std::fmt::Display for AudioTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioTrack::Original => write!(f, "original"),
            AudioTrack::Accompaniment => write!(f, "accompaniment"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playing_and_active() {
        assert!(PlaybackState::Start.is_playing());
        assert!(PlaybackState::Resume.is_playing());
        assert!(!PlaybackState::Pause.is_playing());
        assert!(PlaybackState::Pause.is_active());
        assert!(!PlaybackState::Stop.is_active());
        assert!(!PlaybackState::Idle.is_active());
    }
}
