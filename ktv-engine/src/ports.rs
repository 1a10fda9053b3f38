//! Collaborator ports
//!
//! The engine never talks to the room service, the media player, the queue
//! store or the catalog directly; it goes through these traits. Async ports
//! are called from spawned tasks so a slow collaborator never stalls the
//! engine loop. Player commands are synchronous and non-blocking; the
//! player reports back through [`crate::playback::PlayerEvent`]s sent to the
//! engine handle.

use crate::error::Result;
use async_trait::async_trait;
use ktv_common::events::{AudioTrack, Volumes};
use ktv_common::{MusicAsset, PlayToken, QueueEntry, UserId};
use std::collections::HashMap;
use std::path::PathBuf;

/// Shared room key-value metadata
#[async_trait]
pub trait RoomMetadata: Send + Sync {
    /// Fetch the values currently stored for `keys` (missing keys are omitted)
    async fn get_metadata(&self, keys: &[&str]) -> Result<HashMap<String, String>>;

    /// Write values with admin rights; peers are notified of each changed key
    async fn set_metadata_as_admin(&self, values: HashMap<String, String>) -> Result<()>;
}

/// One page of the room's waiting queue
#[derive(Debug, Clone, Default)]
pub struct QueuePage {
    pub entries: Vec<QueueEntry>,
    /// None (or empty) when this was the last page
    pub next_cursor: Option<String>,
}

/// Room-scoped store backing the waiting queue
///
/// Mutations report success or failure; the resulting queue changes arrive
/// separately as change notifications.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn add_song(&self, entry: QueueEntry) -> Result<()>;
    async fn remove_songs(&self, song_ids: &[String]) -> Result<()>;
    async fn set_next(&self, song_id: &str) -> Result<()>;
    async fn get_page(&self, cursor: Option<String>, page_size: usize) -> Result<QueuePage>;
}

/// Licensed song catalog service
#[async_trait]
pub trait SongCatalog: Send + Sync {
    async fn song_list(&self) -> Result<Vec<MusicAsset>>;
    async fn query_play_token(&self, song_id: &str, user_id: UserId) -> Result<PlayToken>;
}

/// Bundled demo track files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalLoadParams {
    pub song_id: String,
    pub original_path: PathBuf,
    pub accompany_path: PathBuf,
    pub lyric_path: PathBuf,
}

/// Licensed track plus its play authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicensedLoadParams {
    pub song_id: String,
    pub token: PlayToken,
    pub original_url: Option<String>,
    pub accompany_url: Option<String>,
    pub lyric_url: Option<String>,
}

/// External media player owned by the lead singer
///
/// Every method returns immediately; outcomes arrive as player events.
pub trait KaraokePlayer: Send + Sync {
    fn load_local(&self, params: LocalLoadParams) -> Result<()>;
    fn load_licensed(&self, params: LicensedLoadParams) -> Result<()>;
    fn start(&self);
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
    fn switch_track(&self, track: AudioTrack);
    fn set_volumes(&self, volumes: Volumes);
    fn set_pitch_shift(&self, semitones: i32);
}

/// Audio-processing parameter sink of the underlying audio engine
pub trait AudioEffects: Send + Sync {
    fn set_parameter(&self, key: &str, value: &serde_json::Value) -> Result<()>;
}
