//! Song catalog adapter
//!
//! **Responsibilities:**
//! - Cache the playable catalog as the canonical song metadata lookup
//! - Decide how a song is loaded: bundled demo files or licensed stream
//! - HTTP client for the catalog service

use crate::error::{Error, Result};
use crate::ports::{LicensedLoadParams, LocalLoadParams, SongCatalog};
use async_trait::async_trait;
use ktv_common::models::{is_local_song, LOCAL_SONG_PREFIX};
use ktv_common::{MusicAsset, PlayToken, UserId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// How the head song gets into the player
#[derive(Debug, Clone, PartialEq)]
pub enum SongSource {
    /// Bundled demo; load straight from disk
    Local(LocalLoadParams),
    /// Licensed; a play token must be resolved first
    Licensed { song_id: String, asset: Option<MusicAsset> },
}

/// Cached view over a [`SongCatalog`]
///
/// The cache is only mutated by the engine loop; fetches run elsewhere and
/// hand their results back through [`SongCatalogAdapter::install`].
pub struct SongCatalogAdapter {
    catalog: Arc<dyn SongCatalog>,
    local_assets_dir: PathBuf,
    songs: Vec<MusicAsset>,
    by_id: HashMap<String, usize>,
}

impl SongCatalogAdapter {
    pub fn new(catalog: Arc<dyn SongCatalog>, local_assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            local_assets_dir: local_assets_dir.into(),
            songs: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn service(&self) -> Arc<dyn SongCatalog> {
        Arc::clone(&self.catalog)
    }

    /// Replace the cached catalog
    pub fn install(&mut self, songs: Vec<MusicAsset>) {
        self.by_id = songs
            .iter()
            .enumerate()
            .map(|(index, song)| (song.music_id.clone(), index))
            .collect();
        self.songs = songs;
        debug!("Catalog cache holds {} songs", self.songs.len());
    }

    pub fn songs(&self) -> &[MusicAsset] {
        &self.songs
    }

    pub fn lookup(&self, song_id: &str) -> Option<&MusicAsset> {
        self.by_id.get(song_id).map(|&index| &self.songs[index])
    }

    pub fn resolve_source(&self, song_id: &str) -> SongSource {
        if is_local_song(song_id) {
            SongSource::Local(local_params(&self.local_assets_dir, song_id))
        } else {
            SongSource::Licensed {
                song_id: song_id.to_string(),
                asset: self.lookup(song_id).cloned(),
            }
        }
    }
}

/// Bundled asset layout: `<dir>/<id without prefix>/{original.mp3,accompany.mp3,lyrics.lrc}`
fn local_params(dir: &Path, song_id: &str) -> LocalLoadParams {
    let stem = song_id.strip_prefix(LOCAL_SONG_PREFIX).unwrap_or(song_id);
    let song_dir = dir.join(stem);
    LocalLoadParams {
        song_id: song_id.to_string(),
        original_path: song_dir.join("original.mp3"),
        accompany_path: song_dir.join("accompany.mp3"),
        lyric_path: song_dir.join("lyrics.lrc"),
    }
}

/// Resolve a play token and build licensed load parameters
pub async fn resolve_licensed(
    catalog: &dyn SongCatalog,
    song_id: &str,
    user_id: UserId,
    asset: Option<MusicAsset>,
) -> Result<LicensedLoadParams> {
    let token = catalog
        .query_play_token(song_id, user_id)
        .await
        .map_err(|e| Error::PlayToken {
            song_id: song_id.to_string(),
            reason: e.to_string(),
        })?;
    Ok(LicensedLoadParams {
        song_id: song_id.to_string(),
        token,
        original_url: asset.as_ref().map(|a| a.original_url.clone()),
        accompany_url: asset.as_ref().map(|a| a.accompany_url.clone()),
        lyric_url: asset.map(|a| a.lyric_url),
    })
}

/// Catalog service client over HTTP
///
/// - `GET {base}/songs` returns the song list
/// - `GET {base}/songs/{id}/play-token?user_id={uid}` returns a [`PlayToken`]
pub struct HttpSongCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSongCatalog {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ktv-engine/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SongCatalog for HttpSongCatalog {
    async fn song_list(&self) -> Result<Vec<MusicAsset>> {
        let url = format!("{}/songs", self.base_url);
        debug!("Fetching catalog from {}", url);
        let songs = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<MusicAsset>>()
            .await?;
        Ok(songs)
    }

    async fn query_play_token(&self, song_id: &str, user_id: UserId) -> Result<PlayToken> {
        let url = format!("{}/songs/{}/play-token", self.base_url, song_id);
        let response = self
            .client
            .get(&url)
            .query(&[("user_id", user_id)])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Catalog(format!("song {} is not licensed", song_id)));
        }
        Ok(response.error_for_status()?.json::<PlayToken>().await?)
    }
}
