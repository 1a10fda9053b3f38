//! Event types for the KTV event system
//!
//! Provides the observable event definitions and the EventBus every
//! UI observer subscribes to.

// Sub-modules (supporting types)
mod playback_types;
mod queue_types;
mod shared_types;

pub use playback_types::{AudioTrack, PlaybackState};
pub use queue_types::QueueChangeReason;
pub use shared_types::Volumes;

use crate::models::{LyricLine, PitchSegment, QueueEntry, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// KTV event types
///
/// Everything a UI observer can react to is published as one of these.
/// Events are broadcast via EventBus and are serializable so they can be
/// forwarded to a remote presentation layer unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KtvEvent {
    /// Waiting queue projection changed
    QueueChanged {
        /// Full ordered queue after the change
        entries: Vec<QueueEntry>,
        /// What kind of change produced it
        reason: QueueChangeReason,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Currently playing entry changed (or its metadata was refreshed)
    CurrentSongChanged {
        /// None when nothing is loaded
        entry: Option<QueueEntry>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Lead singer's playback state changed
    PlaybackStateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback progress reported by the player
    PlaybackProgress {
        song_id: String,
        position_ms: u64,
        duration_ms: u64,
    },

    /// Lyric and pitch reference tracks for the loaded song
    LyricsLoaded {
        song_id: String,
        lyrics: Vec<LyricLine>,
        pitch_reference: Vec<PitchSegment>,
    },

    /// Lead singer's own pitch as measured by the local player
    PitchUpdated { pitch: f64 },

    /// Lead singer's own score as computed by the local player
    ///
    /// `current_score` is -1 until the first line is scored.
    ScoreUpdated {
        current_score: f64,
        average_score: f64,
    },

    /// Original/accompaniment selection changed
    AudioTrackChanged { track: AudioTrack },

    /// Mix levels changed
    VolumesChanged { volumes: Volumes },

    /// Key shift changed (semitones)
    PitchShiftChanged { semitones: i32 },

    /// Room-wide scoring flag changed
    ScoringEnabledChanged { enabled: bool },

    /// Room-wide request-music flag changed
    RequestMusicEnabledChanged { enabled: bool },

    /// Remote lead singer's pitch as perceived from incoming audio frames
    RemotePitchChanged { speaker_id: UserId, pitch: f64 },

    /// Remote lead singer's score as perceived from incoming audio frames
    RemoteScoreChanged {
        speaker_id: UserId,
        score: f64,
        average_score: f64,
    },

    /// User-visible error
    ///
    /// The single "code + message" pair handed to the presentation layer.
    /// Never fatal to the engine.
    ErrorReported {
        code: i32,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl KtvEvent {
    /// Short event name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            KtvEvent::QueueChanged { .. } => "QueueChanged",
            KtvEvent::CurrentSongChanged { .. } => "CurrentSongChanged",
            KtvEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            KtvEvent::PlaybackProgress { .. } => "PlaybackProgress",
            KtvEvent::LyricsLoaded { .. } => "LyricsLoaded",
            KtvEvent::PitchUpdated { .. } => "PitchUpdated",
            KtvEvent::ScoreUpdated { .. } => "ScoreUpdated",
            KtvEvent::AudioTrackChanged { .. } => "AudioTrackChanged",
            KtvEvent::VolumesChanged { .. } => "VolumesChanged",
            KtvEvent::PitchShiftChanged { .. } => "PitchShiftChanged",
            KtvEvent::ScoringEnabledChanged { .. } => "ScoringEnabledChanged",
            KtvEvent::RequestMusicEnabledChanged { .. } => "RequestMusicEnabledChanged",
            KtvEvent::RemotePitchChanged { .. } => "RemotePitchChanged",
            KtvEvent::RemoteScoreChanged { .. } => "RemoteScoreChanged",
            KtvEvent::ErrorReported { .. } => "ErrorReported",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for room events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// Publishing never waits, so the audio-thread telemetry path may emit
/// through it as well.
///
/// # Examples
///
/// ```
/// use ktv_common::events::{EventBus, KtvEvent, PlaybackState};
/// use std::sync::Arc;
///
/// let event_bus = Arc::new(EventBus::new(256));
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(KtvEvent::PlaybackStateChanged {
///     old_state: PlaybackState::Idle,
///     new_state: PlaybackState::Start,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(
///     rx.try_recv(),
///     Ok(KtvEvent::PlaybackStateChanged { .. })
/// ));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<KtvEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<KtvEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: KtvEvent) -> Result<usize, broadcast::error::SendError<KtvEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: KtvEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(8);
        let result = bus.emit(KtvEvent::PitchShiftChanged { semitones: 2 });
        assert!(result.is_err());
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 8);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit_lossy(KtvEvent::ScoringEnabledChanged { enabled: false });
        bus.emit_lossy(KtvEvent::RequestMusicEnabledChanged { enabled: true });

        match rx.recv().await.unwrap() {
            KtvEvent::ScoringEnabledChanged { enabled } => assert!(!enabled),
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            KtvEvent::RequestMusicEnabledChanged { enabled } => assert!(enabled),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = KtvEvent::RemoteScoreChanged {
            speaker_id: 7,
            score: 88.5,
            average_score: 80.0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RemoteScoreChanged");
        assert_eq!(json["speaker_id"], 7);
        assert_eq!(event.kind(), "RemoteScoreChanged");
    }

    #[test]
    fn test_volumes_are_clamped() {
        let volumes = Volumes::new(150, 30);
        assert_eq!(volumes.music, 100);
        assert_eq!(volumes.vocal, 30);
    }
}
