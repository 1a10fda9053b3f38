//! Messages flowing into the engine loop
//!
//! Player callbacks, queue and metadata notifications, user commands and
//! completions of spawned collaborator calls all arrive as one
//! [`EngineMessage`] stream consumed by a single owner.

use crate::error::Error;
use crate::ports::LicensedLoadParams;
use ktv_common::events::{AudioTrack, QueueChangeReason, Volumes};
use ktv_common::models::{LyricLine, PitchSegment};
use ktv_common::{MusicAsset, QueueEntry};
use std::collections::HashMap;

/// Callback from the external player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    LoadSucceeded {
        song_id: String,
        lyrics: Vec<LyricLine>,
        pitch_reference: Vec<PitchSegment>,
    },
    LoadFailed {
        song_id: String,
        reason: String,
    },
    Started,
    Paused,
    Resumed,
    Stopped,
    Progress {
        position_ms: u64,
        duration_ms: u64,
    },
    Pitch {
        value: f64,
    },
    Score {
        current: f64,
        average: f64,
    },
    /// Runtime error not tied to a load
    Error {
        code: i32,
        message: String,
    },
}

/// User-facing command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    RequestSong(QueueEntry),
    CancelSong(String),
    ClearQueue,
    SetNext(String),
    Start,
    Pause,
    Resume,
    Stop,
    SwitchTrack(AudioTrack),
    SetVolumes(Volumes),
    SetPitchShift(i32),
    SetScoringEnabled(bool),
    SetRequestMusicEnabled(bool),
    /// Score view entered or left full-screen mode
    SetFullScreen(bool),
    /// Score view finished showing the final score
    FinalScoreConsumed,
    Teardown,
}

#[derive(Debug)]
pub(crate) enum EngineMessage {
    Initialize,
    Command(Command),
    Player(PlayerEvent),
    QueueChanged {
        reason: QueueChangeReason,
        entries: Vec<QueueEntry>,
    },
    MetadataChanged {
        key: String,
        value: String,
    },
    QueueFetched(Result<Vec<QueueEntry>, Error>),
    CatalogFetched(Result<Vec<MusicAsset>, Error>),
    FlagsFetched(Result<HashMap<String, String>, Error>),
    LicensedResolved {
        song_id: String,
        result: Result<LicensedLoadParams, Error>,
    },
    /// A store mutation issued by an advance failed
    AdvanceFailed { song_id: String, error: Error },
    /// A spawned collaborator call failed
    CollaboratorFailed(Error),
    ScoreDisplayElapsed {
        generation: u64,
    },
}
