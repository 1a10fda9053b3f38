//! Shared observable state
//!
//! Read side of the engine for UI observers: the latest published
//! projections plus the event bus announcing changes to them. Only the
//! engine loop writes here, so every write is a complete state update.

use crate::playback::PlaybackSession;
use crate::room::RoomFlags;
use crate::telemetry::RemoteSingerState;
use ktv_common::events::{AudioTrack, EventBus, KtvEvent, PlaybackState, Volumes};
use ktv_common::QueueEntry;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Point-in-time copy of everything observable
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub session: PlaybackSession,
    pub queue: Vec<QueueEntry>,
    pub current_song: Option<QueueEntry>,
    pub flags: RoomFlags,
    pub volumes: Volumes,
    pub pitch_shift: i32,
}

/// Shared state accessible by observers and the engine
pub struct SharedState {
    session: RwLock<PlaybackSession>,
    queue: RwLock<Vec<QueueEntry>>,
    current_song: RwLock<Option<QueueEntry>>,
    flags: RwLock<RoomFlags>,
    initial_flags: RoomFlags,
    volumes: RwLock<Volumes>,
    pitch_shift: RwLock<i32>,

    /// Lead singer's telemetry as received by this peer
    remote: Arc<RemoteSingerState>,

    events: EventBus,
}

impl SharedState {
    pub fn new(event_capacity: usize, initial_flags: RoomFlags) -> Self {
        Self {
            session: RwLock::new(PlaybackSession::default()),
            queue: RwLock::new(Vec::new()),
            current_song: RwLock::new(None),
            flags: RwLock::new(initial_flags),
            initial_flags,
            volumes: RwLock::new(Volumes::default()),
            pitch_shift: RwLock::new(0),
            remote: Arc::new(RemoteSingerState::default()),
            events: EventBus::new(event_capacity),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<KtvEvent> {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    pub fn remote(&self) -> Arc<RemoteSingerState> {
        Arc::clone(&self.remote)
    }

    pub async fn session(&self) -> PlaybackSession {
        self.session.read().await.clone()
    }

    pub async fn playback_state(&self) -> PlaybackState {
        self.session.read().await.state
    }

    pub async fn selected_track(&self) -> AudioTrack {
        self.session.read().await.selected_track
    }

    pub async fn queue(&self) -> Vec<QueueEntry> {
        self.queue.read().await.clone()
    }

    pub async fn current_song(&self) -> Option<QueueEntry> {
        self.current_song.read().await.clone()
    }

    pub async fn flags(&self) -> RoomFlags {
        *self.flags.read().await
    }

    pub async fn volumes(&self) -> Volumes {
        *self.volumes.read().await
    }

    pub async fn pitch_shift(&self) -> i32 {
        *self.pitch_shift.read().await
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            session: self.session().await,
            queue: self.queue().await,
            current_song: self.current_song().await,
            flags: self.flags().await,
            volumes: self.volumes().await,
            pitch_shift: self.pitch_shift().await,
        }
    }

    pub(crate) async fn set_session(&self, session: PlaybackSession) {
        *self.session.write().await = session;
    }

    pub(crate) async fn set_queue(&self, queue: Vec<QueueEntry>) {
        *self.queue.write().await = queue;
    }

    pub(crate) async fn set_current_song(&self, entry: Option<QueueEntry>) {
        *self.current_song.write().await = entry;
    }

    pub(crate) async fn set_flags(&self, flags: RoomFlags) {
        *self.flags.write().await = flags;
    }

    pub(crate) async fn set_volumes(&self, volumes: Volumes) {
        *self.volumes.write().await = volumes;
    }

    pub(crate) async fn set_pitch_shift(&self, semitones: i32) {
        *self.pitch_shift.write().await = semitones;
    }

    /// Back to defaults on teardown
    pub(crate) async fn reset(&self) {
        self.set_session(PlaybackSession::default()).await;
        self.set_queue(Vec::new()).await;
        self.set_current_song(None).await;
        self.set_flags(self.initial_flags).await;
        self.set_volumes(Volumes::default()).await;
        self.set_pitch_shift(0).await;
        self.remote.reset();
    }
}
