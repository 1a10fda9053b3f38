//! Playback state machine
//!
//! **Responsibilities:**
//! - Load the queue head (bundled files directly, licensed songs after
//!   play-token resolution)
//! - Apply player callbacks to the session
//! - Resolve what a stop callback means and advance to the next song
//! - Lead-singer playback commands
//!
//! Only the lead singer ever calls the player. Other peers mirror the
//! queue head and whatever player callbacks they are fed.

use super::core::{DeferredAdvance, KtvEngine};
use crate::catalog::{self, SongSource};
use crate::error::{Error, Result};
use crate::playback::events::{EngineMessage, PlayerEvent};
use crate::playback::state::{resolve_stop, StopCause, StopContext, StopResolution};
use crate::ports::LicensedLoadParams;
use chrono::Utc;
use ktv_common::events::{AudioTrack, KtvEvent, PlaybackState, Volumes};
use ktv_common::models::{LyricLine, PitchSegment};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

pub const MIN_PITCH_SHIFT: i32 = -12;
pub const MAX_PITCH_SHIFT: i32 = 12;

impl KtvEngine {
    // ========================================
    // Loading
    // ========================================

    /// Hand the queue head to the player, or go idle if the queue is empty
    pub(super) async fn load_head(&mut self) {
        let Some(head) = self.queue.head().cloned() else {
            debug!("Queue empty; nothing to load");
            self.switching_to_next = false;
            self.go_idle().await;
            return;
        };
        if !self.is_lead() {
            return;
        }

        info!(
            "Loading {} ({}) requested by {}",
            head.song_id, head.song_name, head.requester
        );
        self.session.current_song_id = Some(head.song_id.clone());
        self.session.progress_ms = 0;
        self.session.duration_ms = 0;
        self.session.lyrics.clear();
        self.session.pitch_reference.clear();
        self.load_in_flight = Some(head.song_id.clone());
        self.set_current_song(Some(head.clone())).await;
        self.publish_session().await;

        match self.catalog.resolve_source(&head.song_id) {
            SongSource::Local(params) => {
                if let Err(e) = self.player.load_local(params) {
                    self.on_load_failed(&head.song_id, e).await;
                }
            }
            SongSource::Licensed { song_id, asset } => {
                let service = self.catalog.service();
                let user_id = self.room.local_user;
                self.spawn_reply(async move {
                    let result =
                        catalog::resolve_licensed(service.as_ref(), &song_id, user_id, asset).await;
                    EngineMessage::LicensedResolved { song_id, result }
                });
            }
        }
    }

    pub(super) async fn on_licensed_resolved(
        &mut self,
        song_id: String,
        result: Result<LicensedLoadParams>,
    ) {
        if self.load_in_flight.as_deref() != Some(song_id.as_str()) {
            debug!("Ignoring play token for {}; no longer loading it", song_id);
            return;
        }
        if self.pending_stop == Some(StopCause::Manual) {
            debug!("Manual stop pending; not loading {}", song_id);
            self.load_in_flight = None;
            return;
        }
        let loaded = result.and_then(|params| self.player.load_licensed(params));
        if let Err(e) = loaded {
            self.on_load_failed(&song_id, e).await;
        }
    }

    /// Surface a load failure and skip past the song
    async fn on_load_failed(&mut self, song_id: &str, error: Error) {
        let error = if error.is_load_failure() {
            error
        } else {
            Error::LoadFailed {
                song_id: song_id.to_string(),
                reason: error.to_string(),
            }
        };
        self.report_error(&error);

        if self.load_in_flight.as_deref() == Some(song_id) {
            self.load_in_flight = None;
        }
        if self.is_lead() && self.session.current_song_id.as_deref() == Some(song_id) {
            self.play_next().await;
        }
    }

    /// Back to IDLE with nothing loaded
    pub(super) async fn go_idle(&mut self) {
        self.load_in_flight = None;
        let state = self.session.state;
        self.session.unload();
        self.session.state = state;
        self.set_state(PlaybackState::Idle).await;
        self.publish_session().await;
        self.set_current_song(None).await;
    }

    // ========================================
    // Advancing
    // ========================================

    /// Remove the finished song; the resulting REMOVE notification loads
    /// the new head
    ///
    /// Guarded by `switching_to_next` so concurrent triggers advance once.
    pub(super) async fn play_next(&mut self) {
        if !self.is_lead() {
            debug!("Not the lead singer; the owner advances the queue");
            return;
        }
        if self.switching_to_next {
            debug!("Advance already in progress");
            return;
        }
        self.cancel_deferred_advance();

        let finished = self
            .session
            .current_song_id
            .clone()
            .filter(|id| self.queue.contains(id));
        match finished {
            Some(song_id) => {
                info!("Advancing past {}", song_id);
                self.switching_to_next = true;
                let store = Arc::clone(&self.queue_store);
                self.spawn_task(async move {
                    let result = store.remove_songs(std::slice::from_ref(&song_id)).await;
                    result
                        .err()
                        .map(|error| EngineMessage::AdvanceFailed { song_id, error })
                });
            }
            // Finished song already left the queue; just load whatever heads it
            None => Box::pin(self.load_head()).await,
        }
    }

    /// The store refused to remove the finished song
    ///
    /// A removal that lost the race against another peer's removal is not an
    /// error; that REMOVE notification already moved the queue on.
    pub(super) fn on_advance_failed(&mut self, song_id: &str, error: Error) {
        if !self.queue.contains(song_id) {
            debug!("{} already left the queue; ignoring: {}", song_id, error);
            return;
        }
        self.switching_to_next = false;
        self.report_error(&error);
    }

    pub(super) fn cancel_deferred_advance(&mut self) {
        if let Some(deferred) = self.deferred_advance.take() {
            debug!("Cancelling deferred advance #{}", deferred.generation);
            deferred.abort.abort();
        }
    }

    fn hold_for_score_display(&self) -> bool {
        self.score_view.full_screen
            && self.bridge.flags().scoring_enabled
            && !self.score_view.final_score_consumed
    }

    fn schedule_deferred_advance(&mut self) {
        self.cancel_deferred_advance();
        self.advance_generation += 1;
        let generation = self.advance_generation;
        let delay = self.config.score_display_delay;
        info!("Showing final score for {:?} before advancing", delay);

        let abort = self.spawn_task(async move {
            tokio::time::sleep(delay).await;
            Some(EngineMessage::ScoreDisplayElapsed { generation })
        });
        if let Some(abort) = abort {
            self.deferred_advance = Some(DeferredAdvance { generation, abort });
        }
    }

    pub(super) async fn on_score_display_elapsed(&mut self, generation: u64) {
        match &self.deferred_advance {
            Some(deferred) if deferred.generation == generation => {
                self.deferred_advance = None;
                self.play_next().await;
            }
            _ => debug!("Ignoring stale deferred advance #{}", generation),
        }
    }

    pub(super) async fn final_score_consumed(&mut self) {
        self.score_view.final_score_consumed = true;
        if self.deferred_advance.is_some() {
            debug!("Final score consumed; advancing now");
            self.cancel_deferred_advance();
            self.play_next().await;
        }
    }

    // ========================================
    // Player callbacks
    // ========================================

    pub(super) async fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::LoadSucceeded {
                song_id,
                lyrics,
                pitch_reference,
            } => self.on_load_succeeded(song_id, lyrics, pitch_reference).await,
            PlayerEvent::LoadFailed { song_id, reason } => {
                let error = Error::LoadFailed {
                    song_id: song_id.clone(),
                    reason,
                };
                self.on_load_failed(&song_id, error).await;
            }
            PlayerEvent::Started => self.on_started().await,
            PlayerEvent::Paused => self.set_state(PlaybackState::Pause).await,
            PlayerEvent::Resumed => self.set_state(PlaybackState::Resume).await,
            PlayerEvent::Stopped => self.on_stopped().await,
            PlayerEvent::Progress {
                position_ms,
                duration_ms,
            } => {
                self.session.progress_ms = position_ms;
                self.session.duration_ms = duration_ms;
                self.publish_session().await;
                if let Some(song_id) = self.session.current_song_id.clone() {
                    self.emit(KtvEvent::PlaybackProgress {
                        song_id,
                        position_ms,
                        duration_ms,
                    });
                }
            }
            PlayerEvent::Pitch { value } => {
                self.session.pitch = Some(value);
                self.session.pitch_samples += 1;
                self.publish_session().await;
                self.emit(KtvEvent::PitchUpdated { pitch: value });
            }
            PlayerEvent::Score { current, average } => {
                if !self.bridge.flags().scoring_enabled {
                    trace!("Scoring disabled; dropping score {}", current);
                    return;
                }
                self.session.current_score = current;
                self.session.average_score = average;
                self.publish_session().await;
                self.emit(KtvEvent::ScoreUpdated {
                    current_score: current,
                    average_score: average,
                });
            }
            PlayerEvent::Error { code, message } => {
                warn!("Player error {}: {}", code, message);
                self.emit(KtvEvent::ErrorReported {
                    code,
                    message,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    async fn on_load_succeeded(
        &mut self,
        song_id: String,
        lyrics: Vec<LyricLine>,
        pitch_reference: Vec<PitchSegment>,
    ) {
        if self.load_in_flight.as_deref() != Some(song_id.as_str()) {
            debug!("Ignoring load result for {}; no longer loading it", song_id);
            return;
        }
        if self.pending_stop == Some(StopCause::Manual) {
            debug!("Manual stop pending; not starting {}", song_id);
            self.load_in_flight = None;
            return;
        }
        info!(
            "Loaded {}: {} lyric lines, {} pitch segments",
            song_id,
            lyrics.len(),
            pitch_reference.len()
        );
        self.session.lyrics = lyrics;
        self.session.pitch_reference = pitch_reference;
        self.publish_session().await;
        self.emit(KtvEvent::LyricsLoaded {
            song_id,
            lyrics: self.session.lyrics.clone(),
            pitch_reference: self.session.pitch_reference.clone(),
        });

        if self.is_lead() {
            self.player.switch_track(self.session.selected_track);
            self.player.set_volumes(self.volumes);
            self.player.set_pitch_shift(self.pitch_shift);
            self.player.start();
        }
    }

    async fn on_started(&mut self) {
        self.load_in_flight = None;
        self.pending_stop = None;
        self.switching_to_next = false;
        self.cancel_deferred_advance();
        self.score_view.final_score_consumed = false;

        self.session.reset_for_start();
        self.set_state(PlaybackState::Start).await;
        self.publish_session().await;
        self.emit(KtvEvent::ScoreUpdated {
            current_score: self.session.current_score,
            average_score: self.session.average_score,
        });
    }

    async fn on_stopped(&mut self) {
        let resolution = resolve_stop(StopContext {
            cause: self.pending_stop.take(),
            switching: self.switching_to_next || self.load_in_flight.is_some(),
            lead_singer: self.is_lead(),
            queue_empty: self.queue.is_empty(),
            session_loaded: self.session.state != PlaybackState::Idle
                || self.session.current_song_id.is_some(),
        });
        debug!("Player stopped: {:?}", resolution);

        match resolution {
            StopResolution::Idle => {
                self.switching_to_next = false;
                self.cancel_deferred_advance();
                self.go_idle().await;
            }
            StopResolution::HoldStopped | StopResolution::SwitchInProgress => {
                self.set_state(PlaybackState::Stop).await;
            }
            StopResolution::Stale => {}
            StopResolution::NaturalEnd => {
                self.set_state(PlaybackState::Stop).await;
                if !self.is_lead() {
                    return;
                }
                if self.hold_for_score_display() {
                    self.schedule_deferred_advance();
                } else {
                    self.play_next().await;
                }
            }
        }
    }

    // ========================================
    // Commands
    // ========================================

    pub(super) async fn start(&mut self) {
        if !self.is_lead() {
            debug!("Ignoring start from non-owner");
            return;
        }
        let busy = self.load_in_flight.is_some() || self.switching_to_next;
        match self.session.state {
            PlaybackState::Idle | PlaybackState::Stop if !busy => {
                if self.deferred_advance.is_some() {
                    self.cancel_deferred_advance();
                    self.play_next().await;
                } else {
                    self.load_head().await;
                }
            }
            PlaybackState::Pause => self.player.resume(),
            state => debug!("Start ignored in state {}", state),
        }
    }

    pub(super) fn pause(&mut self) {
        if !self.is_lead() {
            debug!("Ignoring pause from non-owner");
            return;
        }
        if self.session.state.is_playing() {
            self.player.pause();
        }
    }

    pub(super) fn resume(&mut self) {
        if !self.is_lead() {
            debug!("Ignoring resume from non-owner");
            return;
        }
        if self.session.state == PlaybackState::Pause {
            self.player.resume();
        }
    }

    pub(super) async fn stop(&mut self) {
        if !self.is_lead() {
            debug!("Ignoring stop from non-owner");
            return;
        }
        self.cancel_deferred_advance();
        if self.session.state.is_active() {
            info!("Manual stop");
            self.pending_stop = Some(StopCause::Manual);
            self.player.stop();
        } else if self.load_in_flight.is_some() {
            // Not started yet; a late load or token result finds nothing in flight
            info!("Manual stop while loading");
            self.player.stop();
            self.switching_to_next = false;
            self.go_idle().await;
        } else if self.session.state == PlaybackState::Stop {
            // Player already stopped; no callback will follow
            self.switching_to_next = false;
            self.go_idle().await;
        }
    }

    pub(super) async fn switch_track(&mut self, track: AudioTrack) {
        if !self.is_lead() {
            debug!("Ignoring track switch from non-owner");
            return;
        }
        if self.session.selected_track == track {
            return;
        }
        self.session.selected_track = track;
        self.player.switch_track(track);
        self.publish_session().await;
        self.emit(KtvEvent::AudioTrackChanged { track });
    }

    pub(super) async fn set_volumes(&mut self, volumes: Volumes) {
        if !self.is_lead() {
            debug!("Ignoring volume change from non-owner");
            return;
        }
        let volumes = Volumes::new(volumes.music, volumes.vocal);
        if self.volumes == volumes {
            return;
        }
        self.volumes = volumes;
        self.player.set_volumes(volumes);
        self.state.set_volumes(volumes).await;
        self.emit(KtvEvent::VolumesChanged { volumes });
    }

    pub(super) async fn set_pitch_shift(&mut self, semitones: i32) {
        if !self.is_lead() {
            debug!("Ignoring pitch shift from non-owner");
            return;
        }
        let semitones = semitones.clamp(MIN_PITCH_SHIFT, MAX_PITCH_SHIFT);
        if self.pitch_shift == semitones {
            return;
        }
        self.pitch_shift = semitones;
        self.player.set_pitch_shift(semitones);
        self.state.set_pitch_shift(semitones).await;
        self.emit(KtvEvent::PitchShiftChanged { semitones });
    }
}
