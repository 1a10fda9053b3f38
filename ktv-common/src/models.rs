//! Room data model shared by the engine and its collaborators

use serde::{Deserialize, Serialize};

/// Numeric user id as assigned by the room service
pub type UserId = u32;

/// Song id prefix reserved for bundled demo tracks
///
/// Songs carrying this prefix never go through play-token resolution; they
/// resolve straight to files under the local asset directory.
pub const LOCAL_SONG_PREFIX: &str = "local-";

/// Returns true if `song_id` names a bundled demo track
pub fn is_local_song(song_id: &str) -> bool {
    song_id.starts_with(LOCAL_SONG_PREFIX)
}

/// One pending or playing song request in a room's waiting queue
///
/// `song_id` is unique within a room; the queue never holds two entries
/// with the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Catalog song id
    pub song_id: String,
    /// Display name of the song
    pub song_name: String,
    /// Display name of the participant who requested it
    pub requester: String,
}

impl QueueEntry {
    pub fn new(
        song_id: impl Into<String>,
        song_name: impl Into<String>,
        requester: impl Into<String>,
    ) -> Self {
        Self {
            song_id: song_id.into(),
            song_name: song_name.into(),
            requester: requester.into(),
        }
    }

    /// Whether this entry refers to a bundled demo track
    pub fn is_local(&self) -> bool {
        is_local_song(&self.song_id)
    }
}

/// Catalog metadata for a playable track
///
/// Immutable once fetched from the catalog service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicAsset {
    pub music_id: String,
    pub name: String,
    #[serde(default)]
    pub singer: String,
    pub original_url: String,
    pub accompany_url: String,
    pub lyric_url: String,
    #[serde(default)]
    pub pitch_url: Option<String>,
}

impl MusicAsset {
    pub fn is_local(&self) -> bool {
        is_local_song(&self.music_id)
    }
}

/// Short-lived authorization to load one licensed track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayToken {
    pub token: String,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub license_url: Option<String>,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// One timed lyric line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricLine {
    pub begin_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// One segment of the reference pitch curve the singer is scored against
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchSegment {
    pub begin_ms: u64,
    pub duration_ms: u64,
    pub pitch: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_prefix_detection() {
        assert!(is_local_song("local-001"));
        assert!(!is_local_song("6625526605291650"));
        assert!(!is_local_song("xlocal-001"));

        let entry = QueueEntry::new("local-002", "Demo", "alice");
        assert!(entry.is_local());
    }

    #[test]
    fn test_music_asset_optional_fields_default() {
        let json = r#"{
            "music_id": "42",
            "name": "Song",
            "original_url": "https://cdn/42/o.mp3",
            "accompany_url": "https://cdn/42/a.mp3",
            "lyric_url": "https://cdn/42/l.xml"
        }"#;
        let asset: MusicAsset = serde_json::from_str(json).unwrap();
        assert_eq!(asset.singer, "");
        assert!(asset.pitch_url.is_none());
        assert!(!asset.is_local());
    }
}
