//! ktv-engine specific configuration

use ktv_common::config::KtvConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Engine tunables
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Frames stamped with a changed telemetry payload
    pub retransmit_frames: u32,
    /// How often the loop checks the audio thread's remote singer values
    pub remote_poll_interval: Duration,
    /// Delay before advancing while the final score is on screen
    pub score_display_delay: Duration,
    /// Scoring flag the lead singer publishes when the room disagrees
    pub default_scoring_enabled: bool,
    /// Page size for the initial queue fetch
    pub queue_page_size: usize,
    /// Directory holding bundled demo tracks
    pub local_assets_dir: PathBuf,
    /// Event bus capacity
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&KtvConfig::default())
    }
}

impl From<&KtvConfig> for EngineConfig {
    fn from(config: &KtvConfig) -> Self {
        Self {
            retransmit_frames: config.telemetry.retransmit_frames,
            remote_poll_interval: Duration::from_millis(config.telemetry.remote_poll_ms.max(1)),
            score_display_delay: Duration::from_millis(config.playback.score_display_delay_ms),
            default_scoring_enabled: config.playback.default_scoring_enabled,
            queue_page_size: config.queue.page_size.max(1),
            local_assets_dir: config.catalog.local_assets_dir.clone(),
            event_capacity: config.events.capacity.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_room_protocol() {
        let config = EngineConfig::default();
        assert_eq!(config.retransmit_frames, 5);
        assert_eq!(config.remote_poll_interval, Duration::from_millis(50));
        assert_eq!(config.score_display_delay, Duration::from_secs(5));
        assert!(config.default_scoring_enabled);
    }
}
