//! Room flag commands and notifications

use super::core::KtvEngine;
use crate::room::FlagChange;
use ktv_common::events::KtvEvent;
use std::collections::HashMap;
use tracing::info;

impl KtvEngine {
    pub(super) async fn set_scoring_enabled(&mut self, enabled: bool) {
        let previous = self.bridge.flags().scoring_enabled;
        let Some(write) = self.bridge.admin_write(FlagChange::Scoring(enabled)) else {
            return;
        };
        self.write_metadata(write);
        if previous != enabled {
            self.on_flag_changed(FlagChange::Scoring(enabled), true).await;
        }
    }

    pub(super) async fn set_request_music_enabled(&mut self, enabled: bool) {
        let previous = self.bridge.flags().request_music_enabled;
        let Some(write) = self.bridge.admin_write(FlagChange::RequestMusic(enabled)) else {
            return;
        };
        self.write_metadata(write);
        if previous != enabled {
            self.on_flag_changed(FlagChange::RequestMusic(enabled), true).await;
        }
    }

    fn write_metadata(&mut self, values: HashMap<String, String>) {
        let metadata = self.bridge.metadata();
        self.spawn_mutation(async move { metadata.set_metadata_as_admin(values).await });
    }

    pub(super) async fn on_metadata_changed(&mut self, key: &str, value: &str) {
        if let Some(change) = self.bridge.apply_change(key, value) {
            self.on_flag_changed(change, true).await;
        }
    }

    /// Values read once on join
    ///
    /// A room joined with requests already disabled is mirrored as is; the
    /// queue-clearing override only runs on a live change.
    pub(super) async fn on_flags_fetched(&mut self, values: HashMap<String, String>) {
        for change in self.bridge.apply_fetched(&values) {
            self.on_flag_changed(change, false).await;
        }
        self.publish_flags().await;

        let default_scoring = self.config.default_scoring_enabled;
        if self.bridge.initial_owner_write(&values, default_scoring).is_some() {
            self.set_scoring_enabled(default_scoring).await;
        }
    }

    async fn on_flag_changed(&mut self, change: FlagChange, live: bool) {
        self.publish_flags().await;
        match change {
            FlagChange::Scoring(enabled) => {
                info!("Scoring {}", if enabled { "enabled" } else { "disabled" });
                self.emit(KtvEvent::ScoringEnabledChanged { enabled });
            }
            FlagChange::RequestMusic(enabled) => {
                info!("Song requests {}", if enabled { "enabled" } else { "disabled" });
                self.emit(KtvEvent::RequestMusicEnabledChanged { enabled });
                if !enabled && live {
                    self.clear_queue_and_reset().await;
                }
            }
        }
    }
}
