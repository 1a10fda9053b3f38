//! Engine handle
//!
//! Cloneable front door to a running engine. Commands and collaborator
//! notifications are queued for the engine loop and never block; reads go
//! to the shared observable state.

use crate::error::{Error, Result};
use crate::playback::events::{Command, EngineMessage, PlayerEvent};
use crate::state::SharedState;
use crate::telemetry::{IncomingTelemetry, OutgoingTelemetry, SharedTelemetry, TelemetryContext};
use ktv_common::events::{AudioTrack, KtvEvent, QueueChangeReason, Volumes};
use ktv_common::QueueEntry;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineMessage>,
    state: Arc<SharedState>,
    telemetry: SharedTelemetry,
    retransmit_frames: u32,
}

impl EngineHandle {
    pub(super) fn new(
        tx: mpsc::UnboundedSender<EngineMessage>,
        state: Arc<SharedState>,
        telemetry: SharedTelemetry,
        retransmit_frames: u32,
    ) -> Self {
        Self {
            tx,
            state,
            telemetry,
            retransmit_frames,
        }
    }

    fn send(&self, message: EngineMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::EngineClosed)
    }

    /// True once the engine has been torn down
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn command(&self, command: Command) -> Result<()> {
        self.send(EngineMessage::Command(command))
    }

    // ========================================
    // Collaborator notifications
    // ========================================

    /// Forward a player callback
    pub fn player_event(&self, event: PlayerEvent) -> Result<()> {
        self.send(EngineMessage::Player(event))
    }

    /// Forward a queue store change notification
    pub fn queue_changed(&self, reason: QueueChangeReason, entries: Vec<QueueEntry>) -> Result<()> {
        self.send(EngineMessage::QueueChanged { reason, entries })
    }

    /// Forward a room metadata change notification
    pub fn metadata_changed(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.send(EngineMessage::MetadataChanged {
            key: key.into(),
            value: value.into(),
        })
    }

    // ========================================
    // Commands
    // ========================================

    pub fn request_song(&self, entry: QueueEntry) -> Result<()> {
        self.command(Command::RequestSong(entry))
    }

    pub fn cancel_song(&self, song_id: impl Into<String>) -> Result<()> {
        self.command(Command::CancelSong(song_id.into()))
    }

    pub fn clear_queue(&self) -> Result<()> {
        self.command(Command::ClearQueue)
    }

    pub fn set_next(&self, song_id: impl Into<String>) -> Result<()> {
        self.command(Command::SetNext(song_id.into()))
    }

    pub fn start(&self) -> Result<()> {
        self.command(Command::Start)
    }

    pub fn pause(&self) -> Result<()> {
        self.command(Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.command(Command::Resume)
    }

    pub fn stop(&self) -> Result<()> {
        self.command(Command::Stop)
    }

    pub fn switch_track(&self, track: AudioTrack) -> Result<()> {
        self.command(Command::SwitchTrack(track))
    }

    pub fn set_volumes(&self, volumes: Volumes) -> Result<()> {
        self.command(Command::SetVolumes(volumes))
    }

    pub fn set_pitch_shift(&self, semitones: i32) -> Result<()> {
        self.command(Command::SetPitchShift(semitones))
    }

    pub fn set_scoring_enabled(&self, enabled: bool) -> Result<()> {
        self.command(Command::SetScoringEnabled(enabled))
    }

    pub fn set_request_music_enabled(&self, enabled: bool) -> Result<()> {
        self.command(Command::SetRequestMusicEnabled(enabled))
    }

    pub fn set_full_screen(&self, full_screen: bool) -> Result<()> {
        self.command(Command::SetFullScreen(full_screen))
    }

    pub fn final_score_consumed(&self) -> Result<()> {
        self.command(Command::FinalScoreConsumed)
    }

    pub fn teardown(&self) -> Result<()> {
        self.command(Command::Teardown)
    }

    // ========================================
    // Observation
    // ========================================

    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KtvEvent> {
        self.state.subscribe_events()
    }

    /// Snapshot currently seen by the audio thread
    pub fn telemetry_context(&self) -> Arc<TelemetryContext> {
        self.telemetry.load_full()
    }

    // ========================================
    // Audio thread
    // ========================================

    /// Processor for locally captured frames; owned by the audio thread
    pub fn outgoing_telemetry(&self) -> OutgoingTelemetry {
        OutgoingTelemetry::new(Arc::clone(&self.telemetry), self.retransmit_frames)
    }

    /// Processor for frames received from remote peers; owned by the audio thread
    pub fn incoming_telemetry(&self) -> IncomingTelemetry {
        IncomingTelemetry::new(Arc::clone(&self.telemetry), self.state.remote())
    }
}
