//! Playback session and stop-cause resolution

use ktv_common::events::{AudioTrack, PlaybackState};
use ktv_common::models::{LyricLine, PitchSegment};

/// Score reported before the first scored line of a song
pub const UNSCORED: f64 = -1.0;

/// The lead singer's single active playback context
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    /// Song being loaded or played; None when idle
    pub current_song_id: Option<String>,
    pub state: PlaybackState,
    pub progress_ms: u64,
    pub duration_ms: u64,
    pub lyrics: Vec<LyricLine>,
    pub pitch_reference: Vec<PitchSegment>,
    /// Latest sung pitch
    pub pitch: Option<f64>,
    /// Pitch samples received since the song started
    pub pitch_samples: u64,
    pub current_score: f64,
    pub average_score: f64,
    pub selected_track: AudioTrack,
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self {
            current_song_id: None,
            state: PlaybackState::Idle,
            progress_ms: 0,
            duration_ms: 0,
            lyrics: Vec::new(),
            pitch_reference: Vec::new(),
            pitch: None,
            pitch_samples: 0,
            current_score: UNSCORED,
            average_score: 0.0,
            selected_track: AudioTrack::default(),
        }
    }
}

impl PlaybackSession {
    /// Reset per-song counters when the player reports the song started
    pub fn reset_for_start(&mut self) {
        self.progress_ms = 0;
        self.pitch = None;
        self.pitch_samples = 0;
        self.current_score = UNSCORED;
        self.average_score = 0.0;
    }

    /// Drop everything tied to the loaded song; the selected track survives
    pub fn unload(&mut self) {
        let selected_track = self.selected_track;
        *self = Self {
            selected_track,
            ..Self::default()
        };
    }
}

/// Why the engine itself asked the player to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// Lead singer pressed stop (or the request-music override fired)
    Manual,
    /// The active song was removed from the queue
    SongRemoved,
}

/// What a player "stopped" callback means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopResolution {
    /// Go idle; never advance
    Idle,
    /// Report STOP; the removal path already loads the new head
    HoldStopped,
    /// Report STOP; an advance is already underway
    SwitchInProgress,
    /// End of track; advance to the next song
    NaturalEnd,
    /// Nothing was loaded; ignore
    Stale,
}

/// Inputs to [`resolve_stop`] sampled when the callback fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopContext {
    pub cause: Option<StopCause>,
    /// Advance in flight or a load not yet confirmed by the player
    pub switching: bool,
    pub lead_singer: bool,
    pub queue_empty: bool,
    /// A song was loaded when the callback fired
    pub session_loaded: bool,
}

/// Decide what a stop callback means
///
/// Priority: manual stop, removal, switching, audience with nothing queued,
/// then natural end.
pub fn resolve_stop(ctx: StopContext) -> StopResolution {
    match (ctx.cause, ctx.switching) {
        (Some(StopCause::Manual), _) => StopResolution::Idle,
        (Some(StopCause::SongRemoved), _) => StopResolution::HoldStopped,
        (None, true) => StopResolution::SwitchInProgress,
        (None, false) if !ctx.lead_singer && ctx.queue_empty => StopResolution::Idle,
        (None, false) if !ctx.session_loaded => StopResolution::Stale,
        (None, false) => StopResolution::NaturalEnd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(cause: Option<StopCause>, switching: bool) -> StopContext {
        StopContext {
            cause,
            switching,
            lead_singer: true,
            queue_empty: false,
            session_loaded: true,
        }
    }

    #[test]
    fn test_manual_stop_wins_over_everything() {
        for switching in [false, true] {
            assert_eq!(resolve_stop(ctx(Some(StopCause::Manual), switching)), StopResolution::Idle);
        }
        let empty_audience = StopContext {
            lead_singer: false,
            queue_empty: true,
            ..ctx(Some(StopCause::Manual), false)
        };
        assert_eq!(resolve_stop(empty_audience), StopResolution::Idle);
    }

    #[test]
    fn test_removal_holds_stopped_even_while_switching() {
        assert_eq!(
            resolve_stop(ctx(Some(StopCause::SongRemoved), true)),
            StopResolution::HoldStopped
        );
    }

    #[test]
    fn test_switching_suppresses_advance() {
        assert_eq!(resolve_stop(ctx(None, true)), StopResolution::SwitchInProgress);
    }

    #[test]
    fn test_audience_with_empty_queue_goes_idle() {
        let audience = StopContext {
            lead_singer: false,
            queue_empty: true,
            ..ctx(None, false)
        };
        assert_eq!(resolve_stop(audience), StopResolution::Idle);

        let audience_with_queue = StopContext {
            lead_singer: false,
            ..ctx(None, false)
        };
        assert_eq!(resolve_stop(audience_with_queue), StopResolution::NaturalEnd);
    }

    #[test]
    fn test_stop_with_nothing_loaded_is_stale() {
        let unloaded = StopContext {
            session_loaded: false,
            ..ctx(None, false)
        };
        assert_eq!(resolve_stop(unloaded), StopResolution::Stale);
        assert_eq!(resolve_stop(ctx(None, false)), StopResolution::NaturalEnd);
    }

    #[test]
    fn test_session_start_reset() {
        let mut session = PlaybackSession {
            current_song_id: Some("A".to_string()),
            current_score: 87.0,
            average_score: 80.0,
            pitch: Some(220.0),
            pitch_samples: 12,
            selected_track: AudioTrack::Original,
            ..PlaybackSession::default()
        };
        session.reset_for_start();
        assert_eq!(session.current_score, UNSCORED);
        assert_eq!(session.average_score, 0.0);
        assert_eq!(session.pitch_samples, 0);
        assert_eq!(session.current_song_id.as_deref(), Some("A"));

        session.unload();
        assert!(session.current_song_id.is_none());
        assert_eq!(session.state, PlaybackState::Idle);
        assert_eq!(session.selected_track, AudioTrack::Original);
    }
}
