//! In-memory collaborators
//!
//! Process-local implementations of every port. The simulator runs a whole
//! room on them and the tests use them to observe what the engine asked
//! for. Stores notify attached engines synchronously, the way a room
//! service would push change notifications.

use crate::error::{Error, Result};
use crate::playback::{EngineHandle, PlayerEvent};
use crate::ports::{
    AudioEffects, KaraokePlayer, LicensedLoadParams, LocalLoadParams, QueuePage, QueueStore,
    RoomMetadata, SongCatalog,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use ktv_common::events::{AudioTrack, QueueChangeReason, Volumes};
use ktv_common::models::LyricLine;
use ktv_common::{MusicAsset, PlayToken, QueueEntry, UserId};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Engines receiving change notifications
#[derive(Default)]
struct Subscribers {
    handles: Mutex<Vec<EngineHandle>>,
}

impl Subscribers {
    fn attach(&self, handle: EngineHandle) {
        lock(&self.handles).push(handle);
    }

    /// Deliver to every live engine, forgetting closed ones
    fn notify(&self, send: impl Fn(&EngineHandle) -> Result<()>) {
        lock(&self.handles).retain(|handle| send(handle).is_ok());
    }
}

// ========================================
// Queue store
// ========================================

/// Room queue kept in memory
#[derive(Default)]
pub struct InMemoryQueueStore {
    entries: Mutex<Vec<QueueEntry>>,
    subscribers: Subscribers,
    fail_mutations: AtomicBool,
    page_requests: AtomicUsize,
    remove_calls: Mutex<Vec<Vec<String>>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<QueueEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            ..Self::default()
        }
    }

    /// Forward future changes to `handle`
    pub fn attach(&self, handle: EngineHandle) {
        self.subscribers.attach(handle);
    }

    /// Make every following mutation fail
    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        lock(&self.entries).clone()
    }

    pub fn song_ids(&self) -> Vec<String> {
        lock(&self.entries).iter().map(|e| e.song_id.clone()).collect()
    }

    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }

    /// Arguments of every `remove_songs` call so far
    pub fn remove_calls(&self) -> Vec<Vec<String>> {
        lock(&self.remove_calls).clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(Error::QueueStore("store unavailable".to_string()));
        }
        Ok(())
    }

    fn notify(&self, reason: QueueChangeReason, changed: Vec<QueueEntry>) {
        if changed.is_empty() {
            return;
        }
        self.subscribers
            .notify(|handle| handle.queue_changed(reason, changed.clone()));
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn add_song(&self, entry: QueueEntry) -> Result<()> {
        self.check_writable()?;
        {
            let mut entries = lock(&self.entries);
            if entries.iter().any(|e| e.song_id == entry.song_id) {
                return Err(Error::QueueStore(format!("{} is already queued", entry.song_id)));
            }
            entries.push(entry.clone());
        }
        self.notify(QueueChangeReason::Add, vec![entry]);
        Ok(())
    }

    async fn remove_songs(&self, song_ids: &[String]) -> Result<()> {
        lock(&self.remove_calls).push(song_ids.to_vec());
        self.check_writable()?;
        let removed: Vec<QueueEntry> = {
            let mut entries = lock(&self.entries);
            let (removed, kept): (Vec<QueueEntry>, Vec<QueueEntry>) = entries
                .drain(..)
                .partition(|e| song_ids.contains(&e.song_id));
            *entries = kept;
            removed
        };
        self.notify(QueueChangeReason::Remove, removed);
        Ok(())
    }

    async fn set_next(&self, song_id: &str) -> Result<()> {
        self.check_writable()?;
        let moved = {
            let mut entries = lock(&self.entries);
            let Some(index) = entries.iter().position(|e| e.song_id == song_id) else {
                return Err(Error::QueueStore(format!("{} is not queued", song_id)));
            };
            let moved = entries.remove(index);
            let target = entries.len().min(1);
            entries.insert(target, moved.clone());
            moved
        };
        self.notify(QueueChangeReason::OrderChanged, vec![moved]);
        Ok(())
    }

    async fn get_page(&self, cursor: Option<String>, page_size: usize) -> Result<QueuePage> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        let offset = match cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| Error::QueueStore(format!("bad cursor {:?}", cursor)))?,
            None => 0,
        };
        let entries = lock(&self.entries);
        let end = (offset + page_size.max(1)).min(entries.len());
        let page = entries.get(offset..end).unwrap_or_default().to_vec();
        Ok(QueuePage {
            entries: page,
            next_cursor: (end < entries.len()).then(|| end.to_string()),
        })
    }
}

// ========================================
// Room metadata
// ========================================

/// Room key-value metadata kept in memory
#[derive(Default)]
pub struct InMemoryRoomMetadata {
    values: Mutex<HashMap<String, String>>,
    subscribers: Subscribers,
    fail_writes: AtomicBool,
}

impl InMemoryRoomMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, handle: EngineHandle) {
        self.subscribers.attach(handle);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn value(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }
}

#[async_trait]
impl RoomMetadata for InMemoryRoomMetadata {
    async fn get_metadata(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let values = lock(&self.values);
        Ok(keys
            .iter()
            .filter_map(|key| values.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    async fn set_metadata_as_admin(&self, values: HashMap<String, String>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::RoomMetadata("metadata write rejected".to_string()));
        }
        let mut changed = Vec::new();
        {
            let mut stored = lock(&self.values);
            for (key, value) in values {
                if stored.get(&key) != Some(&value) {
                    stored.insert(key.clone(), value.clone());
                    changed.push((key, value));
                }
            }
        }
        for (key, value) in changed {
            self.subscribers
                .notify(|handle| handle.metadata_changed(key.clone(), value.clone()));
        }
        Ok(())
    }
}

// ========================================
// Player
// ========================================

/// A call the engine made on the player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCall {
    LoadLocal(String),
    LoadLicensed { song_id: String, token: String },
    Start,
    Pause,
    Resume,
    Stop,
    SwitchTrack(AudioTrack),
    SetVolumes(Volumes),
    SetPitchShift(i32),
}

#[derive(Default)]
struct PlayerStatus {
    loaded: Option<String>,
    playing: bool,
}

/// Player that records calls and, once attached, answers like a real one
///
/// Loads succeed immediately (unless the song is marked as failing), start
/// reports started, stop reports stopped if anything was loaded.
#[derive(Default)]
pub struct RecordingPlayer {
    calls: Mutex<Vec<PlayerCall>>,
    responder: Mutex<Option<EngineHandle>>,
    status: Mutex<PlayerStatus>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call with the matching callback through `handle`
    pub fn attach(&self, handle: EngineHandle) {
        *lock(&self.responder) = Some(handle);
    }

    /// Loads of `song_id` report failure
    pub fn fail_loads_of(&self, song_id: &str) {
        lock(&self.failing).insert(song_id.to_string());
    }

    pub fn calls(&self) -> Vec<PlayerCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Song ids passed to either load call, in order
    pub fn loads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlayerCall::LoadLocal(song_id) | PlayerCall::LoadLicensed { song_id, .. } => {
                    Some(song_id)
                }
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &PlayerCall) -> usize {
        lock(&self.calls).iter().filter(|c| *c == call).count()
    }

    /// Emit a callback as if the player produced it on its own
    pub fn emit(&self, event: PlayerEvent) {
        if let Some(handle) = lock(&self.responder).as_ref() {
            let _ = handle.player_event(event);
        }
    }

    /// Reach the end of the current track
    pub fn finish_song(&self) {
        let was_playing = {
            let mut status = lock(&self.status);
            let was_playing = status.playing;
            *status = PlayerStatus::default();
            was_playing
        };
        if was_playing {
            self.emit(PlayerEvent::Stopped);
        }
    }

    fn record(&self, call: PlayerCall) {
        debug!("Player call: {:?}", call);
        lock(&self.calls).push(call);
    }

    fn load(&self, song_id: &str) {
        if lock(&self.failing).contains(song_id) {
            self.emit(PlayerEvent::LoadFailed {
                song_id: song_id.to_string(),
                reason: "unsupported media".to_string(),
            });
            return;
        }
        lock(&self.status).loaded = Some(song_id.to_string());
        self.emit(PlayerEvent::LoadSucceeded {
            song_id: song_id.to_string(),
            lyrics: vec![LyricLine {
                begin_ms: 0,
                end_ms: 4_000,
                text: format!("{} line one", song_id),
            }],
            pitch_reference: Vec::new(),
        });
    }
}

impl KaraokePlayer for RecordingPlayer {
    fn load_local(&self, params: LocalLoadParams) -> Result<()> {
        self.record(PlayerCall::LoadLocal(params.song_id.clone()));
        self.load(&params.song_id);
        Ok(())
    }

    fn load_licensed(&self, params: LicensedLoadParams) -> Result<()> {
        self.record(PlayerCall::LoadLicensed {
            song_id: params.song_id.clone(),
            token: params.token.token.clone(),
        });
        self.load(&params.song_id);
        Ok(())
    }

    fn start(&self) {
        self.record(PlayerCall::Start);
        let started = {
            let mut status = lock(&self.status);
            status.playing = status.loaded.is_some();
            status.playing
        };
        if started {
            self.emit(PlayerEvent::Started);
        }
    }

    fn pause(&self) {
        self.record(PlayerCall::Pause);
        self.emit(PlayerEvent::Paused);
    }

    fn resume(&self) {
        self.record(PlayerCall::Resume);
        self.emit(PlayerEvent::Resumed);
    }

    fn stop(&self) {
        self.record(PlayerCall::Stop);
        let was_loaded = {
            let mut status = lock(&self.status);
            let was_loaded = status.loaded.is_some();
            *status = PlayerStatus::default();
            was_loaded
        };
        if was_loaded {
            self.emit(PlayerEvent::Stopped);
        }
    }

    fn switch_track(&self, track: AudioTrack) {
        self.record(PlayerCall::SwitchTrack(track));
    }

    fn set_volumes(&self, volumes: Volumes) {
        self.record(PlayerCall::SetVolumes(volumes));
    }

    fn set_pitch_shift(&self, semitones: i32) {
        self.record(PlayerCall::SetPitchShift(semitones));
    }
}

// ========================================
// Catalog
// ========================================

/// Fixed catalog; every listed song is licensed to every user
#[derive(Default)]
pub struct StaticCatalog {
    songs: Vec<MusicAsset>,
}

impl StaticCatalog {
    pub fn new(songs: Vec<MusicAsset>) -> Self {
        Self { songs }
    }
}

#[async_trait]
impl SongCatalog for StaticCatalog {
    async fn song_list(&self) -> Result<Vec<MusicAsset>> {
        Ok(self.songs.clone())
    }

    async fn query_play_token(&self, song_id: &str, user_id: UserId) -> Result<PlayToken> {
        if !self.songs.iter().any(|song| song.music_id == song_id) {
            return Err(Error::Catalog(format!("song {} is not licensed", song_id)));
        }
        Ok(PlayToken {
            token: format!("token-{}-{}", song_id, user_id),
            license_key: None,
            license_url: None,
            expires_at: Some(Utc::now() + Duration::minutes(10)),
        })
    }
}

// ========================================
// Audio effects
// ========================================

/// Effects sink that records accepted parameters
#[derive(Default)]
pub struct RecordingEffects {
    applied: Mutex<Vec<(String, Value)>>,
    rejected: HashSet<String>,
}

impl RecordingEffects {
    /// Reject the given keys, accept everything else
    pub fn rejecting(keys: &[&str]) -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
            rejected: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn applied(&self) -> Vec<(String, Value)> {
        lock(&self.applied).clone()
    }
}

impl AudioEffects for RecordingEffects {
    fn set_parameter(&self, key: &str, value: &Value) -> Result<()> {
        if self.rejected.contains(key) {
            return Err(Error::Effects(format!("unsupported parameter {}", key)));
        }
        lock(&self.applied).push((key.to_string(), value.clone()));
        Ok(())
    }
}
