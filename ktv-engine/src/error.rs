//! Error types for ktv-engine
//!
//! Every variant maps to a numeric code so the presentation layer receives
//! a single "code + message" pair (see [`Error::code`]).

use thiserror::Error;

/// Main error type for ktv-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors bubbled up from ktv-common
    #[error(transparent)]
    Common(#[from] ktv_common::Error),

    /// HTTP transport errors from the catalog client
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Song catalog query failed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Play token could not be resolved for a licensed song
    #[error("Play token for {song_id} unavailable: {reason}")]
    PlayToken { song_id: String, reason: String },

    /// Player failed to load a song
    #[error("Failed to load {song_id}: {reason}")]
    LoadFailed { song_id: String, reason: String },

    /// Player reported a runtime error
    #[error("Player error: {0}")]
    Player(String),

    /// Queue backing store rejected or failed a mutation
    #[error("Queue store error: {0}")]
    QueueStore(String),

    /// Room metadata read/write failed
    #[error("Room metadata error: {0}")]
    RoomMetadata(String),

    /// Audio effects engine rejected a parameter
    #[error("Audio effects error: {0}")]
    Effects(String),

    /// The engine has been torn down
    #[error("Engine is closed")]
    EngineClosed,

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// User-facing numeric error code
    pub fn code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::Common(_) => 1001,
            Error::Http(_) | Error::Catalog(_) => 2001,
            Error::PlayToken { .. } => 2002,
            Error::LoadFailed { .. } => 3001,
            Error::Player(_) => 3002,
            Error::QueueStore(_) => 4001,
            Error::RoomMetadata(_) => 4002,
            Error::Effects(_) => 5001,
            Error::EngineClosed => 9001,
            Error::Internal(_) => 9999,
        }
    }

    /// Errors that should skip the head song instead of stalling the room
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Error::LoadFailed { .. } | Error::PlayToken { .. })
    }
}

/// Convenience Result type using ktv-engine Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_failures_are_classified() {
        let load = Error::LoadFailed {
            song_id: "42".into(),
            reason: "404".into(),
        };
        let token = Error::PlayToken {
            song_id: "42".into(),
            reason: "expired".into(),
        };
        assert!(load.is_load_failure());
        assert!(token.is_load_failure());
        assert!(!Error::QueueStore("timeout".into()).is_load_failure());
        assert_ne!(load.code(), token.code());
    }

    #[test]
    fn test_message_carries_context() {
        let err = Error::LoadFailed {
            song_id: "42".into(),
            reason: "network".into(),
        };
        assert_eq!(err.to_string(), "Failed to load 42: network");
        assert_eq!(err.code(), 3001);
    }
}
