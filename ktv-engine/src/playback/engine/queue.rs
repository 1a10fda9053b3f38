//! Queue commands and change notifications
//!
//! **Responsibilities:**
//! - Turn queue commands into backing-store mutations (with ownership and
//!   request-music gating)
//! - Apply store change notifications to the projection
//! - Start loading when the queue fills, reload when the active song is
//!   removed

use super::core::KtvEngine;
use crate::playback::state::StopCause;
use ktv_common::events::{PlaybackState, QueueChangeReason};
use ktv_common::QueueEntry;
use std::sync::Arc;
use tracing::{debug, info};

impl KtvEngine {
    // ========================================
    // Commands
    // ========================================

    pub(super) fn request_song(&mut self, entry: QueueEntry) {
        if !self.bridge.flags().request_music_enabled {
            debug!("Song requests are disabled; ignoring {}", entry.song_id);
            return;
        }
        if self.queue.contains(&entry.song_id) {
            debug!("{} is already queued", entry.song_id);
            return;
        }
        info!("Requesting {} ({}) for {}", entry.song_id, entry.song_name, entry.requester);
        let store = Arc::clone(&self.queue_store);
        self.spawn_mutation(async move { store.add_song(entry).await });
    }

    /// Remove a queued song; the owner may remove any, others only their own
    pub(super) fn cancel_song(&mut self, song_id: &str) {
        let Some(entry) = self.queue.get(song_id) else {
            debug!("{} is not queued", song_id);
            return;
        };
        if !self.is_lead() && entry.requester != self.room.local_user_name {
            debug!("Ignoring cancel of {} requested by {}", song_id, entry.requester);
            return;
        }
        let song_ids = vec![song_id.to_string()];
        let store = Arc::clone(&self.queue_store);
        self.spawn_mutation(async move { store.remove_songs(&song_ids).await });
    }

    pub(super) fn clear_queue(&mut self) {
        if !self.is_lead() {
            debug!("Ignoring clear from non-owner");
            return;
        }
        self.remove_all_queued();
    }

    pub(super) fn set_next(&mut self, song_id: &str) {
        if !self.is_lead() {
            debug!("Ignoring set-next from non-owner");
            return;
        }
        if !self.queue.contains(song_id) {
            debug!("{} is not queued", song_id);
            return;
        }
        let song_id = song_id.to_string();
        let store = Arc::clone(&self.queue_store);
        self.spawn_mutation(async move { store.set_next(&song_id).await });
    }

    fn remove_all_queued(&mut self) {
        let song_ids = self.queue.song_ids();
        if song_ids.is_empty() {
            return;
        }
        info!("Removing {} queued songs", song_ids.len());
        let store = Arc::clone(&self.queue_store);
        self.spawn_mutation(async move { store.remove_songs(&song_ids).await });
    }

    // ========================================
    // Change notifications
    // ========================================

    pub(super) async fn on_queue_changed(
        &mut self,
        reason: QueueChangeReason,
        entries: Vec<QueueEntry>,
    ) {
        let active = self.session.current_song_id.clone();
        let outcome = self.queue.apply_delta(reason, entries, active.as_deref());
        if outcome.changed {
            debug!("Queue {}: {} songs", reason, self.queue.len());
            self.publish_queue(reason).await;
        }

        if !self.is_lead() {
            self.mirror_head().await;
            return;
        }

        if let Some(entry) = outcome.active_entry {
            self.set_current_song(Some(entry)).await;
        }
        if outcome.active_removed {
            self.on_active_song_removed().await;
        } else if outcome.became_non_empty && self.ready_to_load() {
            self.load_head().await;
        }
    }

    fn ready_to_load(&self) -> bool {
        matches!(self.session.state, PlaybackState::Idle | PlaybackState::Stop)
            && self.session.current_song_id.is_none()
            && self.load_in_flight.is_none()
            && !self.switching_to_next
            && self.deferred_advance.is_none()
    }

    /// The song being loaded or played left the queue
    async fn on_active_song_removed(&mut self) {
        info!(
            "Active song {} removed from queue",
            self.session.current_song_id.as_deref().unwrap_or("?")
        );
        // This path replaces the normal advance
        self.switching_to_next = false;
        self.cancel_deferred_advance();

        if self.pending_stop == Some(StopCause::Manual) {
            // Manual stop already underway; its callback goes idle
            self.load_in_flight = None;
            self.session.current_song_id = None;
            self.publish_session().await;
            self.set_current_song(None).await;
            return;
        }

        let stopping = self.session.state.is_active() || self.load_in_flight.is_some();
        if stopping {
            self.pending_stop = Some(StopCause::SongRemoved);
            self.player.stop();
        }

        if stopping && self.queue.is_empty() {
            // Stop callback reports STOP; the next load attempt goes idle
            self.load_in_flight = None;
            self.session.current_song_id = None;
            self.publish_session().await;
            self.set_current_song(None).await;
        } else {
            self.load_head().await;
        }
    }

    /// Audience view: the head is what the lead singer is on
    async fn mirror_head(&mut self) {
        let head = self.queue.head().cloned();
        let head_id = head.as_ref().map(|entry| entry.song_id.clone());
        if self.session.current_song_id != head_id {
            self.session.current_song_id = head_id;
            self.publish_session().await;
        }
        self.set_current_song(head).await;
    }

    /// Request-music override: empty the queue and reset playback
    pub(super) async fn clear_queue_and_reset(&mut self) {
        info!("Song requests disabled; clearing queue and resetting playback");
        self.cancel_deferred_advance();
        if self.is_lead() {
            self.remove_all_queued();
            if self.session.state.is_active() || self.load_in_flight.is_some() {
                self.pending_stop = Some(StopCause::Manual);
                self.player.stop();
            }
        }

        self.queue.clear();
        self.publish_queue(QueueChangeReason::Unknown).await;

        self.switching_to_next = false;
        self.load_in_flight = None;
        let state = self.session.state;
        self.session = Default::default();
        self.session.state = state;
        self.set_state(PlaybackState::Idle).await;
        self.publish_session().await;
        self.set_current_song(None).await;
    }
}
