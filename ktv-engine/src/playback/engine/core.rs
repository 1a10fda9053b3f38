//! Core engine - lifecycle and message dispatch
//!
//! **Responsibilities:**
//! - KtvEngine struct definition and construction
//! - Message loop (`run` for production, `run_until_idle` for stepping)
//! - Initial fetches on join and teardown on leave
//! - Spawning collaborator calls whose results come back as messages
//! - Publishing state to observers and to the audio-thread snapshot

use super::handle::EngineHandle;
use crate::catalog::SongCatalogAdapter;
use crate::config::EngineConfig;
use crate::effects;
use crate::error::{Error, Result};
use crate::playback::events::{Command, EngineMessage};
use crate::playback::queue_manager::{self, WaitingQueue};
use crate::playback::state::{PlaybackSession, StopCause};
use crate::ports::{AudioEffects, KaraokePlayer, QueueStore, RoomMetadata, SongCatalog};
use crate::room::{RoomContext, RoomFlags, RoomMetadataBridge};
use crate::state::SharedState;
use crate::telemetry::{RemoteChange, RemoteChangeTracker, SharedTelemetry, TelemetryContext};
use arc_swap::ArcSwap;
use chrono::Utc;
use ktv_common::events::{KtvEvent, PlaybackState, QueueChangeReason, Volumes};
use ktv_common::QueueEntry;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Consecutive empty polls before `run_until_idle` returns
const IDLE_POLLS: usize = 16;

/// External services the engine drives
pub struct Collaborators {
    pub room_metadata: Arc<dyn RoomMetadata>,
    pub queue_store: Arc<dyn QueueStore>,
    pub catalog: Arc<dyn SongCatalog>,
    pub player: Arc<dyn KaraokePlayer>,
    /// Audio engine parameters; None skips the effects preset
    pub effects: Option<Arc<dyn AudioEffects>>,
}

/// Pending advance held back while the final score is shown
pub(super) struct DeferredAdvance {
    pub(super) generation: u64,
    pub(super) abort: AbortHandle,
}

/// What the score view reported
#[derive(Debug, Default)]
pub(super) struct ScoreView {
    pub(super) full_screen: bool,
    pub(super) final_score_consumed: bool,
}

/// Karaoke engine for one room
///
/// Owns the playback session and the queue projection. Messages are
/// processed one at a time, so no two callbacks ever interleave a partial
/// state update.
pub struct KtvEngine {
    pub(super) room: RoomContext,
    pub(super) config: EngineConfig,

    pub(super) session: PlaybackSession,
    pub(super) queue: WaitingQueue,
    pub(super) current_song: Option<QueueEntry>,
    pub(super) volumes: Volumes,
    pub(super) pitch_shift: i32,

    /// Stop requested by the engine, consumed by the next stop callback
    pub(super) pending_stop: Option<StopCause>,
    /// Advance-to-next in progress
    pub(super) switching_to_next: bool,
    /// Song handed to the player but not yet started
    pub(super) load_in_flight: Option<String>,
    pub(super) score_view: ScoreView,
    pub(super) deferred_advance: Option<DeferredAdvance>,
    pub(super) advance_generation: u64,

    pub(super) bridge: RoomMetadataBridge,
    pub(super) catalog: SongCatalogAdapter,
    pub(super) queue_store: Arc<dyn QueueStore>,
    pub(super) player: Arc<dyn KaraokePlayer>,
    effects: Option<Arc<dyn AudioEffects>>,

    pub(super) state: Arc<SharedState>,
    telemetry: SharedTelemetry,
    remote_changes: RemoteChangeTracker,

    rx: mpsc::UnboundedReceiver<EngineMessage>,
    weak_tx: mpsc::WeakUnboundedSender<EngineMessage>,
    tasks: Vec<JoinHandle<()>>,
    torn_down: bool,
}

impl KtvEngine {
    /// Create an engine and its handle
    ///
    /// Nothing happens until the engine is driven by [`KtvEngine::run`] or
    /// [`KtvEngine::run_until_idle`]; the first message processed joins the
    /// room (flag fetch, queue fetch, catalog fetch, effects preset).
    pub fn new(
        room: RoomContext,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(SharedState::new(
            config.event_capacity,
            RoomFlags::with_scoring(config.default_scoring_enabled),
        ));
        let telemetry: SharedTelemetry = Arc::new(ArcSwap::from_pointee(TelemetryContext {
            local_user: room.local_user,
            owner_id: room.owner_id,
            ..TelemetryContext::default()
        }));

        let handle = EngineHandle::new(
            tx.clone(),
            Arc::clone(&state),
            Arc::clone(&telemetry),
            config.retransmit_frames,
        );
        // Receiver is alive; cannot fail
        let _ = tx.send(EngineMessage::Initialize);

        let engine = Self {
            bridge: RoomMetadataBridge::new(
                collaborators.room_metadata,
                room.is_owner(),
                config.default_scoring_enabled,
            ),
            catalog: SongCatalogAdapter::new(collaborators.catalog, config.local_assets_dir.clone()),
            queue_store: collaborators.queue_store,
            player: collaborators.player,
            effects: collaborators.effects,
            room,
            config,
            session: PlaybackSession::default(),
            queue: WaitingQueue::new(),
            current_song: None,
            volumes: Volumes::default(),
            pitch_shift: 0,
            pending_stop: None,
            switching_to_next: false,
            load_in_flight: None,
            score_view: ScoreView::default(),
            deferred_advance: None,
            advance_generation: 0,
            state,
            telemetry,
            remote_changes: RemoteChangeTracker::default(),
            rx,
            weak_tx: tx.downgrade(),
            tasks: Vec::new(),
            torn_down: false,
        };
        (engine, handle)
    }

    /// Create an engine and run it on the tokio runtime
    pub fn spawn(
        room: RoomContext,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> (EngineHandle, JoinHandle<()>) {
        let (engine, handle) = Self::new(room, collaborators, config);
        (handle, tokio::spawn(engine.run()))
    }

    /// Process messages until teardown or until every handle is dropped
    pub async fn run(mut self) {
        info!("Karaoke engine running for room {}", self.room.room_id);
        let mut remote_poll = tokio::time::interval(self.config.remote_poll_interval);
        remote_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                message = self.rx.recv() => {
                    let Some(message) = message else { break };
                    self.dispatch(message).await;
                    if self.torn_down {
                        break;
                    }
                }
                _ = remote_poll.tick() => self.publish_remote_changes(),
            }
        }
        self.teardown().await;
        info!("Karaoke engine for room {} stopped", self.room.room_id);
    }

    /// Process messages until none arrive for a while
    ///
    /// Spawned collaborator calls get a chance to complete in between, so
    /// on a current-thread runtime this drains every ready consequence of
    /// what was sent. Sleeping tasks are not waited for.
    pub async fn run_until_idle(&mut self) {
        let mut idle_polls = 0;
        while idle_polls < IDLE_POLLS && !self.torn_down {
            match self.rx.try_recv() {
                Ok(message) => {
                    idle_polls = 0;
                    self.dispatch(message).await;
                }
                Err(_) => {
                    idle_polls += 1;
                    self.publish_remote_changes();
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub(super) fn is_lead(&self) -> bool {
        self.room.is_owner()
    }

    async fn dispatch(&mut self, message: EngineMessage) {
        if self.torn_down {
            return;
        }
        self.tasks.retain(|task| !task.is_finished());

        match message {
            EngineMessage::Initialize => self.initialize().await,
            EngineMessage::Command(command) => self.handle_command(command).await,
            EngineMessage::Player(event) => self.handle_player_event(event).await,
            EngineMessage::QueueChanged { reason, entries } => {
                self.on_queue_changed(reason, entries).await
            }
            EngineMessage::MetadataChanged { key, value } => {
                self.on_metadata_changed(&key, &value).await
            }
            EngineMessage::QueueFetched(Ok(entries)) => {
                info!("Initial queue fetch returned {} songs", entries.len());
                self.on_queue_changed(QueueChangeReason::Unknown, entries).await
            }
            EngineMessage::CatalogFetched(Ok(songs)) => {
                info!("Catalog lists {} songs", songs.len());
                self.catalog.install(songs);
            }
            EngineMessage::FlagsFetched(Ok(values)) => self.on_flags_fetched(values).await,
            EngineMessage::QueueFetched(Err(e))
            | EngineMessage::CatalogFetched(Err(e))
            | EngineMessage::FlagsFetched(Err(e)) => self.report_error(&e),
            EngineMessage::CollaboratorFailed(e) => {
                error!("Collaborator call failed: {}", e);
                self.report_error(&e);
            }
            EngineMessage::LicensedResolved { song_id, result } => {
                self.on_licensed_resolved(song_id, result).await
            }
            EngineMessage::AdvanceFailed { song_id, error } => {
                self.on_advance_failed(&song_id, error)
            }
            EngineMessage::ScoreDisplayElapsed { generation } => {
                self.on_score_display_elapsed(generation).await
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        debug!("Command: {:?}", command);
        match command {
            Command::RequestSong(entry) => self.request_song(entry),
            Command::CancelSong(song_id) => self.cancel_song(&song_id),
            Command::ClearQueue => self.clear_queue(),
            Command::SetNext(song_id) => self.set_next(&song_id),
            Command::Start => self.start().await,
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Stop => self.stop().await,
            Command::SwitchTrack(track) => self.switch_track(track).await,
            Command::SetVolumes(volumes) => self.set_volumes(volumes).await,
            Command::SetPitchShift(semitones) => self.set_pitch_shift(semitones).await,
            Command::SetScoringEnabled(enabled) => self.set_scoring_enabled(enabled).await,
            Command::SetRequestMusicEnabled(enabled) => {
                self.set_request_music_enabled(enabled).await
            }
            Command::SetFullScreen(full_screen) => self.score_view.full_screen = full_screen,
            Command::FinalScoreConsumed => self.final_score_consumed().await,
            Command::Teardown => self.teardown().await,
        }
    }

    async fn initialize(&mut self) {
        info!(
            "Joining room {} as user {} (owner {}, lead singer: {})",
            self.room.room_id,
            self.room.local_user,
            self.room.owner_id,
            self.is_lead()
        );
        self.publish_telemetry();

        if let Some(effects) = &self.effects {
            effects::apply_preset(effects.as_ref(), &effects::karaoke_preset());
        }

        let metadata = self.bridge.metadata();
        self.spawn_reply(async move {
            EngineMessage::FlagsFetched(RoomMetadataBridge::fetch_flags(metadata.as_ref()).await)
        });

        let store = Arc::clone(&self.queue_store);
        let page_size = self.config.queue_page_size;
        self.spawn_reply(async move {
            EngineMessage::QueueFetched(queue_manager::fetch_all(store.as_ref(), page_size).await)
        });

        let catalog = self.catalog.service();
        self.spawn_reply(async move { EngineMessage::CatalogFetched(catalog.song_list().await) });
    }

    /// Stop playback, cancel pending work and reset everything observable
    ///
    /// Idempotent. Once this returns no further message is processed and
    /// every handle reports [`Error::EngineClosed`].
    pub(super) async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        info!("Tearing down karaoke engine for room {}", self.room.room_id);

        self.cancel_deferred_advance();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if self.is_lead() && (self.session.state.is_active() || self.load_in_flight.is_some()) {
            self.player.stop();
        }

        self.torn_down = true;
        self.rx.close();

        let old_state = self.session.state;
        self.session = PlaybackSession::default();
        self.queue.clear();
        self.current_song = None;
        self.volumes = Volumes::default();
        self.pitch_shift = 0;
        self.pending_stop = None;
        self.switching_to_next = false;
        self.load_in_flight = None;
        self.score_view = ScoreView::default();
        self.bridge.reset();

        self.state.reset().await;
        self.telemetry.store(Arc::new(TelemetryContext::default()));

        if old_state != PlaybackState::Idle {
            self.emit(KtvEvent::PlaybackStateChanged {
                old_state,
                new_state: PlaybackState::Idle,
                timestamp: Utc::now(),
            });
        }
        self.emit(KtvEvent::QueueChanged {
            entries: Vec::new(),
            reason: QueueChangeReason::Unknown,
            timestamp: Utc::now(),
        });
        self.emit(KtvEvent::CurrentSongChanged {
            entry: None,
            timestamp: Utc::now(),
        });
    }

    // ========================================
    // Spawned collaborator calls
    // ========================================

    /// Run `task` off the loop; a returned message is fed back in
    pub(super) fn spawn_task<F>(&mut self, task: F) -> Option<AbortHandle>
    where
        F: Future<Output = Option<EngineMessage>> + Send + 'static,
    {
        let Some(tx) = self.weak_tx.upgrade() else {
            warn!("Engine channel closed; dropping collaborator call");
            return None;
        };
        let handle = tokio::spawn(async move {
            if let Some(message) = task.await {
                let _ = tx.send(message);
            }
        });
        let abort = handle.abort_handle();
        self.tasks.push(handle);
        Some(abort)
    }

    pub(super) fn spawn_reply<F>(&mut self, task: F)
    where
        F: Future<Output = EngineMessage> + Send + 'static,
    {
        self.spawn_task(async move { Some(task.await) });
    }

    /// Fire a store or metadata mutation; only failures come back
    pub(super) fn spawn_mutation<F>(&mut self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.spawn_task(async move { task.await.err().map(EngineMessage::CollaboratorFailed) });
    }

    // ========================================
    // Publishing
    // ========================================

    pub(super) fn emit(&self, event: KtvEvent) {
        self.state.event_bus().emit_lossy(event);
    }

    /// Surface an error to the presentation layer as code + message
    pub(super) fn report_error(&self, error: &Error) {
        warn!("Reporting error {}: {}", error.code(), error);
        self.emit(KtvEvent::ErrorReported {
            code: error.code(),
            message: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub(super) async fn set_state(&mut self, new_state: PlaybackState) {
        let old_state = self.session.state;
        if old_state == new_state {
            return;
        }
        self.session.state = new_state;
        info!("Playback state: {} -> {}", old_state, new_state);
        self.publish_session().await;
        self.emit(KtvEvent::PlaybackStateChanged {
            old_state,
            new_state,
            timestamp: Utc::now(),
        });
    }

    pub(super) async fn publish_session(&self) {
        self.state.set_session(self.session.clone()).await;
        self.publish_telemetry();
    }

    pub(super) async fn publish_queue(&self, reason: QueueChangeReason) {
        let entries = self.queue.entries().to_vec();
        self.state.set_queue(entries.clone()).await;
        self.emit(KtvEvent::QueueChanged {
            entries,
            reason,
            timestamp: Utc::now(),
        });
    }

    pub(super) async fn publish_flags(&self) {
        self.state.set_flags(self.bridge.flags()).await;
        self.publish_telemetry();
    }

    pub(super) async fn set_current_song(&mut self, entry: Option<QueueEntry>) {
        if self.current_song == entry {
            return;
        }
        self.current_song = entry.clone();
        self.state.set_current_song(entry.clone()).await;
        self.emit(KtvEvent::CurrentSongChanged {
            entry,
            timestamp: Utc::now(),
        });
    }

    /// Turn remote singer values written by the audio thread into events
    pub(super) fn publish_remote_changes(&mut self) {
        if self.torn_down {
            return;
        }
        let remote = self.state.remote();
        for change in self.remote_changes.poll(&remote) {
            let event = match change {
                RemoteChange::Pitch { speaker_id, pitch } => {
                    KtvEvent::RemotePitchChanged { speaker_id, pitch }
                }
                RemoteChange::Score {
                    speaker_id,
                    score,
                    average_score,
                } => KtvEvent::RemoteScoreChanged {
                    speaker_id,
                    score,
                    average_score,
                },
            };
            self.emit(event);
        }
    }

    /// Swap in a fresh snapshot for the audio thread
    pub(super) fn publish_telemetry(&self) {
        let scored = self.bridge.flags().scoring_enabled && self.session.current_song_id.is_some();
        self.telemetry.store(Arc::new(TelemetryContext {
            attached: !self.torn_down,
            local_user: self.room.local_user,
            owner_id: self.room.owner_id,
            state: self.session.state,
            pitch: self.session.pitch,
            score: scored.then_some(self.session.current_score),
            average_score: scored.then_some(self.session.average_score),
        }));
    }
}
