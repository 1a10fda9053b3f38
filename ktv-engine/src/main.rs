//! KTV room simulator (ktv-sim) - Main entry point
//!
//! Runs a lead singer and one listener against in-memory collaborators:
//! songs are requested, played through and scored, and the listener
//! follows the lead singer's pitch and score out of simulated audio frames.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ktv_common::config::{resolve_config_path, KtvConfig, CONFIG_ENV_VAR};
use ktv_common::events::{KtvEvent, PlaybackState};
use ktv_common::models::is_local_song;
use ktv_common::{MusicAsset, QueueEntry, UserId};
use ktv_engine::catalog::HttpSongCatalog;
use ktv_engine::config::EngineConfig;
use ktv_engine::memory::{
    InMemoryQueueStore, InMemoryRoomMetadata, RecordingEffects, RecordingPlayer, StaticCatalog,
};
use ktv_engine::playback::{Collaborators, PlayerEvent};
use ktv_engine::ports::SongCatalog;
use ktv_engine::room::RoomContext;
use ktv_engine::telemetry::AudioFrame;
use ktv_engine::KtvEngine;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for ktv-sim
#[derive(Parser, Debug)]
#[command(name = "ktv-sim")]
#[command(about = "Simulate a karaoke room against in-memory collaborators")]
#[command(version)]
struct Args {
    /// Configuration file (takes precedence over KTV_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated song ids to request; `local-` ids use bundled files
    #[arg(short, long, value_delimiter = ',', default_value = "local-001,1001,1002")]
    songs: Vec<String>,

    /// User id of the room owner, who is the lead singer
    #[arg(short, long, default_value_t = 1)]
    owner: UserId,
}

/// Upper bound for any single playback transition
const STATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Audio frame period of the simulated pipeline
const FRAME_PERIOD: Duration = Duration::from_millis(20);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let config = KtvConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("ktv_engine={0},ktv_sim={0}", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }
    if args.songs.is_empty() {
        bail!("No songs to request");
    }

    let catalog: Arc<dyn SongCatalog> = match &config.catalog.base_url {
        Some(url) => {
            info!("Using catalog service at {}", url);
            Arc::new(HttpSongCatalog::new(url.as_str()).context("Failed to build catalog client")?)
        }
        None => Arc::new(StaticCatalog::new(
            args.songs
                .iter()
                .filter(|id| !is_local_song(id))
                .map(|id| demo_asset(id))
                .collect(),
        )),
    };

    let engine_config = EngineConfig::from(&config);
    let store = Arc::new(InMemoryQueueStore::new());
    let metadata = Arc::new(InMemoryRoomMetadata::new());
    let lead_player = Arc::new(RecordingPlayer::new());

    let lead_room = RoomContext {
        room_id: "sim-room".to_string(),
        local_user: args.owner,
        local_user_name: "lead".to_string(),
        owner_id: args.owner,
    };
    let listener_room = RoomContext {
        local_user: args.owner.wrapping_add(1),
        local_user_name: "listener".to_string(),
        ..lead_room.clone()
    };

    let (lead, lead_task) = KtvEngine::spawn(
        lead_room,
        Collaborators {
            room_metadata: metadata.clone(),
            queue_store: store.clone(),
            catalog: Arc::clone(&catalog),
            player: lead_player.clone(),
            effects: Some(Arc::new(RecordingEffects::default())),
        },
        engine_config.clone(),
    );
    let (listener, listener_task) = KtvEngine::spawn(
        listener_room,
        Collaborators {
            room_metadata: metadata.clone(),
            queue_store: store.clone(),
            catalog,
            player: Arc::new(RecordingPlayer::new()),
            effects: None,
        },
        engine_config,
    );

    store.attach(lead.clone());
    store.attach(listener.clone());
    metadata.attach(lead.clone());
    metadata.attach(listener.clone());
    lead_player.attach(lead.clone());

    let mut lead_events = lead.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match lead_events.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("Event log lagged by {}", n),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Audio thread: lead singer's frames are delivered to the listener
    let mut outgoing = lead.outgoing_telemetry();
    let mut incoming = listener.incoming_telemetry();
    let audio = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FRAME_PERIOD);
        loop {
            ticker.tick().await;
            let mut frame = AudioFrame::default();
            outgoing.process_local_frame(&mut frame);
            incoming.process_remote_frame(&frame);
        }
    });

    let mut states = lead.subscribe();
    for (index, song_id) in args.songs.iter().enumerate() {
        let (handle, requester) = if index % 2 == 0 {
            (&listener, "listener")
        } else {
            (&lead, "lead")
        };
        handle.request_song(QueueEntry::new(
            song_id.as_str(),
            format!("Demo song {}", song_id),
            requester,
        ))?;
    }

    for song_id in &args.songs {
        wait_for_state(&mut states, PlaybackState::Start).await?;
        info!("Singing {}", song_id);
        sing(&lead_player).await;
        let remote = listener.state().remote();
        info!(
            "Listener hears lead singer at pitch {:?}, score {:?} (average {:?})",
            remote.pitch(),
            remote.score(),
            remote.average_score()
        );
        lead_player.finish_song();
    }
    wait_for_state(&mut states, PlaybackState::Idle).await?;
    info!("Queue finished");

    lead.teardown()?;
    listener.teardown()?;
    lead_task.await.context("Lead engine task failed")?;
    listener_task.await.context("Listener engine task failed")?;
    audio.abort();
    logger.abort();

    info!("Simulation complete");
    Ok(())
}

fn demo_asset(song_id: &str) -> MusicAsset {
    MusicAsset {
        music_id: song_id.to_string(),
        name: format!("Demo song {}", song_id),
        singer: "ktv-sim".to_string(),
        original_url: format!("https://cdn.invalid/{}/original.mp3", song_id),
        accompany_url: format!("https://cdn.invalid/{}/accompany.mp3", song_id),
        lyric_url: format!("https://cdn.invalid/{}/lyrics.lrc", song_id),
        pitch_url: None,
    }
}

/// Feed a short performance's worth of player callbacks
async fn sing(player: &RecordingPlayer) {
    for step in 1..=5u64 {
        let step_f = step as f64;
        player.emit(PlayerEvent::Progress {
            position_ms: step * 1_000,
            duration_ms: 5_000,
        });
        player.emit(PlayerEvent::Pitch {
            value: 200.0 + step_f * 10.0,
        });
        player.emit(PlayerEvent::Score {
            current: 60.0 + step_f * 5.0,
            average: 60.0 + step_f * 2.5,
        });
        tokio::time::sleep(FRAME_PERIOD * 5).await;
    }
}

async fn wait_for_state(
    events: &mut broadcast::Receiver<KtvEvent>,
    target: PlaybackState,
) -> Result<()> {
    tokio::time::timeout(STATE_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(KtvEvent::PlaybackStateChanged { new_state, .. }) if new_state == target => {
                    return Ok(());
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => bail!("Engine closed"),
            }
        }
    })
    .await
    .with_context(|| format!("Timed out waiting for {}", target))?
}

fn log_event(event: &KtvEvent) {
    match event {
        KtvEvent::PlaybackStateChanged {
            old_state,
            new_state,
            ..
        } => info!("[event] state {} -> {}", old_state, new_state),
        KtvEvent::CurrentSongChanged { entry, .. } => info!(
            "[event] current song: {}",
            entry.as_ref().map_or("none", |e| e.song_name.as_str())
        ),
        KtvEvent::QueueChanged {
            entries, reason, ..
        } => info!("[event] queue {} ({} songs)", reason, entries.len()),
        KtvEvent::ErrorReported { code, message, .. } => {
            warn!("[event] error {}: {}", code, message)
        }
        other => debug!("[event] {}", other.kind()),
    }
}
