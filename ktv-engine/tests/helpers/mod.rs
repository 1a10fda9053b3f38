//! Test helpers for ktv-engine integration tests
//!
//! Provides a `RoomBuilder` that wires an engine to in-memory collaborators
//! and a `TestRoom` that steps it deterministically with
//! `KtvEngine::run_until_idle`.

#![allow(dead_code)]

use ktv_common::events::{KtvEvent, PlaybackState};
use ktv_common::{MusicAsset, QueueEntry, UserId};
use ktv_engine::config::EngineConfig;
use ktv_engine::memory::{
    InMemoryQueueStore, InMemoryRoomMetadata, RecordingEffects, RecordingPlayer, StaticCatalog,
};
use ktv_engine::playback::Collaborators;
use ktv_engine::room::RoomContext;
use ktv_engine::{EngineHandle, KtvEngine};
use std::sync::Arc;
use tokio::sync::broadcast;

pub const OWNER: UserId = 1;
pub const LISTENER: UserId = 2;

pub fn entry(song_id: &str, requester: &str) -> QueueEntry {
    QueueEntry::new(song_id, format!("Song {}", song_id), requester)
}

pub fn asset(song_id: &str) -> MusicAsset {
    MusicAsset {
        music_id: song_id.to_string(),
        name: format!("Song {}", song_id),
        singer: "Singer".to_string(),
        original_url: format!("https://cdn.test/{}/original.mp3", song_id),
        accompany_url: format!("https://cdn.test/{}/accompany.mp3", song_id),
        lyric_url: format!("https://cdn.test/{}/lyrics.lrc", song_id),
        pitch_url: None,
    }
}

pub struct RoomBuilder {
    local_user: UserId,
    user_name: String,
    queue: Vec<QueueEntry>,
    catalog: Vec<MusicAsset>,
    config: EngineConfig,
    store: Option<Arc<InMemoryQueueStore>>,
    metadata: Option<Arc<InMemoryRoomMetadata>>,
    effects: Option<Arc<RecordingEffects>>,
    responsive_player: bool,
}

impl RoomBuilder {
    /// Joins as the room owner
    pub fn lead() -> Self {
        Self {
            local_user: OWNER,
            user_name: "lead".to_string(),
            queue: Vec::new(),
            catalog: Vec::new(),
            config: EngineConfig::default(),
            store: None,
            metadata: None,
            effects: None,
            responsive_player: true,
        }
    }

    /// Joins as an audience member
    pub fn listener() -> Self {
        Self {
            local_user: LISTENER,
            user_name: "listener".to_string(),
            ..Self::lead()
        }
    }

    /// Songs already queued in the store when joining
    pub fn queue(mut self, song_ids: &[&str]) -> Self {
        self.queue = song_ids.iter().map(|id| entry(id, "lead")).collect();
        self
    }

    pub fn catalog(mut self, song_ids: &[&str]) -> Self {
        self.catalog = song_ids.iter().map(|id| asset(id)).collect();
        self
    }

    pub fn configure(mut self, adjust: impl FnOnce(&mut EngineConfig)) -> Self {
        adjust(&mut self.config);
        self
    }

    /// Share the room's store and metadata with another peer
    pub fn sharing(mut self, room: &TestRoom) -> Self {
        self.store = Some(Arc::clone(&room.store));
        self.metadata = Some(Arc::clone(&room.metadata));
        self
    }

    pub fn effects(mut self, effects: Arc<RecordingEffects>) -> Self {
        self.effects = Some(effects);
        self
    }

    /// Player records calls but never answers
    pub fn silent_player(mut self) -> Self {
        self.responsive_player = false;
        self
    }

    /// Build the engine and process the join
    pub async fn join(self) -> TestRoom {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryQueueStore::with_entries(self.queue)));
        let metadata = self
            .metadata
            .unwrap_or_else(|| Arc::new(InMemoryRoomMetadata::new()));
        let player = Arc::new(RecordingPlayer::new());

        let room = RoomContext {
            room_id: "room-1".to_string(),
            local_user: self.local_user,
            local_user_name: self.user_name,
            owner_id: OWNER,
        };
        let collaborators = Collaborators {
            room_metadata: metadata.clone(),
            queue_store: store.clone(),
            catalog: Arc::new(StaticCatalog::new(self.catalog)),
            player: player.clone(),
            effects: self
                .effects
                .map(|effects| effects as Arc<dyn ktv_engine::ports::AudioEffects>),
        };

        let (engine, handle) = KtvEngine::new(room, collaborators, self.config);
        store.attach(handle.clone());
        metadata.attach(handle.clone());
        if self.responsive_player {
            player.attach(handle.clone());
        }
        let events = handle.subscribe();

        let mut room = TestRoom {
            engine,
            handle,
            store,
            metadata,
            player,
            events,
        };
        room.settle().await;
        room
    }
}

pub struct TestRoom {
    pub engine: KtvEngine,
    pub handle: EngineHandle,
    pub store: Arc<InMemoryQueueStore>,
    pub metadata: Arc<InMemoryRoomMetadata>,
    pub player: Arc<RecordingPlayer>,
    pub events: broadcast::Receiver<KtvEvent>,
}

impl TestRoom {
    /// Process everything that is ready
    pub async fn settle(&mut self) {
        self.engine.run_until_idle().await;
    }

    pub async fn playback_state(&self) -> PlaybackState {
        self.handle.state().playback_state().await
    }

    pub async fn queue_ids(&self) -> Vec<String> {
        self.handle
            .state()
            .queue()
            .await
            .into_iter()
            .map(|e| e.song_id)
            .collect()
    }

    pub async fn current_song_id(&self) -> Option<String> {
        self.handle.state().current_song().await.map(|e| e.song_id)
    }

    /// Events published since the last drain
    pub fn drain_events(&mut self) -> Vec<KtvEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Error codes reported since the last drain
    pub fn drain_error_codes(&mut self) -> Vec<i32> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                KtvEvent::ErrorReported { code, .. } => Some(code),
                _ => None,
            })
            .collect()
    }
}
