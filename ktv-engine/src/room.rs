//! Room metadata bridge
//!
//! Two room-wide booleans live in the shared room metadata: whether singing
//! is scored and whether participants may request songs. Only the room
//! owner writes them; every peer mirrors them from change notifications.

use crate::error::Result;
use crate::ports::RoomMetadata;
use ktv_common::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const SCORING_ENABLED_KEY: &str = "ktv.scoring_enabled";
pub const REQUEST_MUSIC_ENABLED_KEY: &str = "ktv.request_music_enabled";

/// Who we are in which room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomContext {
    pub room_id: String,
    pub local_user: UserId,
    pub local_user_name: String,
    /// Room owner; the owner is the lead singer
    pub owner_id: UserId,
}

impl RoomContext {
    pub fn is_owner(&self) -> bool {
        self.local_user == self.owner_id
    }
}

/// Local mirror of the room-wide flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomFlags {
    pub scoring_enabled: bool,
    pub request_music_enabled: bool,
}

impl Default for RoomFlags {
    fn default() -> Self {
        Self::with_scoring(true)
    }
}

impl RoomFlags {
    /// Flags assumed before the room's stored values are known
    pub fn with_scoring(scoring_enabled: bool) -> Self {
        Self {
            scoring_enabled,
            request_music_enabled: true,
        }
    }
}

/// A flag whose mirrored value actually changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagChange {
    Scoring(bool),
    RequestMusic(bool),
}

/// Lenient boolean parsing for metadata values
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn encode_flag(enabled: bool) -> String {
    if enabled { "true" } else { "false" }.to_string()
}

pub struct RoomMetadataBridge {
    metadata: Arc<dyn RoomMetadata>,
    is_owner: bool,
    initial: RoomFlags,
    flags: RoomFlags,
}

impl RoomMetadataBridge {
    /// Every peer starts from the configured scoring default until the
    /// room's values arrive
    pub fn new(
        metadata: Arc<dyn RoomMetadata>,
        is_owner: bool,
        default_scoring_enabled: bool,
    ) -> Self {
        let initial = RoomFlags::with_scoring(default_scoring_enabled);
        Self {
            metadata,
            is_owner,
            initial,
            flags: initial,
        }
    }

    pub fn flags(&self) -> RoomFlags {
        self.flags
    }

    pub fn metadata(&self) -> Arc<dyn RoomMetadata> {
        Arc::clone(&self.metadata)
    }

    /// One-shot read of both flags on join
    pub async fn fetch_flags(metadata: &dyn RoomMetadata) -> Result<HashMap<String, String>> {
        metadata
            .get_metadata(&[SCORING_ENABLED_KEY, REQUEST_MUSIC_ENABLED_KEY])
            .await
    }

    /// Mirror a metadata-changed notification
    ///
    /// Returns the change if the key is one of ours, parses, and differs from
    /// the mirrored value. Duplicate deliveries return None.
    pub fn apply_change(&mut self, key: &str, value: &str) -> Option<FlagChange> {
        let parsed = match parse_flag(value) {
            Some(parsed) => parsed,
            None => {
                debug!("Ignoring unparseable metadata value {}={:?}", key, value);
                return None;
            }
        };
        match key {
            SCORING_ENABLED_KEY if self.flags.scoring_enabled != parsed => {
                self.flags.scoring_enabled = parsed;
                Some(FlagChange::Scoring(parsed))
            }
            REQUEST_MUSIC_ENABLED_KEY if self.flags.request_music_enabled != parsed => {
                self.flags.request_music_enabled = parsed;
                Some(FlagChange::RequestMusic(parsed))
            }
            _ => None,
        }
    }

    /// Mirror the values fetched on join
    pub fn apply_fetched(&mut self, values: &HashMap<String, String>) -> Vec<FlagChange> {
        values
            .iter()
            .filter_map(|(key, value)| self.apply_change(key, value))
            .collect()
    }

    /// Write the lead singer publishes right after joining, if any
    ///
    /// The stored scoring flag may be stale (or absent) from an earlier
    /// session; the owner republishes its local default when they disagree.
    pub fn initial_owner_write(
        &self,
        fetched: &HashMap<String, String>,
        default_scoring_enabled: bool,
    ) -> Option<HashMap<String, String>> {
        if !self.is_owner {
            return None;
        }
        let stored = fetched
            .get(SCORING_ENABLED_KEY)
            .and_then(|v| parse_flag(v));
        if stored == Some(default_scoring_enabled) {
            return None;
        }
        info!(
            "Room scoring flag {:?} disagrees with default {}, republishing",
            stored, default_scoring_enabled
        );
        Some(HashMap::from([(
            SCORING_ENABLED_KEY.to_string(),
            encode_flag(default_scoring_enabled),
        )]))
    }

    /// Build an admin write for `change` and mirror it locally
    ///
    /// Non-owners get None and nothing changes.
    pub fn admin_write(&mut self, change: FlagChange) -> Option<HashMap<String, String>> {
        if !self.is_owner {
            debug!("Non-owner flag write ignored: {:?}", change);
            return None;
        }
        let (key, enabled) = match change {
            FlagChange::Scoring(enabled) => {
                self.flags.scoring_enabled = enabled;
                (SCORING_ENABLED_KEY, enabled)
            }
            FlagChange::RequestMusic(enabled) => {
                self.flags.request_music_enabled = enabled;
                (REQUEST_MUSIC_ENABLED_KEY, enabled)
            }
        };
        Some(HashMap::from([(key.to_string(), encode_flag(enabled))]))
    }

    /// Forget mirrored values
    pub fn reset(&mut self) {
        self.flags = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRoomMetadata;

    fn bridge(is_owner: bool) -> RoomMetadataBridge {
        RoomMetadataBridge::new(Arc::new(InMemoryRoomMetadata::new()), is_owner, true)
    }

    #[test]
    fn test_parse_flag_is_lenient() {
        assert_eq!(parse_flag("true"), Some(true));
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_duplicate_notifications_report_once() {
        let mut bridge = bridge(false);
        assert_eq!(
            bridge.apply_change(SCORING_ENABLED_KEY, "false"),
            Some(FlagChange::Scoring(false))
        );
        assert_eq!(bridge.apply_change(SCORING_ENABLED_KEY, "false"), None);
        assert_eq!(bridge.apply_change("unrelated", "false"), None);
        assert!(!bridge.flags().scoring_enabled);
    }

    #[test]
    fn test_non_owner_cannot_write() {
        let mut bridge = bridge(false);
        assert!(bridge.admin_write(FlagChange::Scoring(false)).is_none());
        assert!(bridge.flags().scoring_enabled);
    }

    #[test]
    fn test_owner_write_mirrors_locally() {
        let mut bridge = bridge(true);
        let write = bridge.admin_write(FlagChange::RequestMusic(false)).unwrap();
        assert_eq!(write[REQUEST_MUSIC_ENABLED_KEY], "false");
        assert!(!bridge.flags().request_music_enabled);
    }

    #[test]
    fn test_owner_republishes_stale_scoring_default() {
        let owner = bridge(true);
        let stale = HashMap::from([(SCORING_ENABLED_KEY.to_string(), "false".to_string())]);
        let write = owner.initial_owner_write(&stale, true).unwrap();
        assert_eq!(write[SCORING_ENABLED_KEY], "true");

        let absent = HashMap::new();
        assert!(owner.initial_owner_write(&absent, true).is_some());

        let agreeing = HashMap::from([(SCORING_ENABLED_KEY.to_string(), "true".to_string())]);
        assert!(owner.initial_owner_write(&agreeing, true).is_none());

        let audience = bridge(false);
        assert!(audience.initial_owner_write(&stale, true).is_none());
    }

    #[test]
    fn test_flags_start_from_configured_default() {
        let mut audience =
            RoomMetadataBridge::new(Arc::new(InMemoryRoomMetadata::new()), false, false);
        assert!(!audience.flags().scoring_enabled);
        assert!(audience.flags().request_music_enabled);

        assert_eq!(
            audience.apply_change(SCORING_ENABLED_KEY, "true"),
            Some(FlagChange::Scoring(true))
        );
        audience.reset();
        assert!(!audience.flags().scoring_enabled);
    }

    #[tokio::test]
    async fn test_fetch_flags_reads_both_keys() {
        let metadata = InMemoryRoomMetadata::new();
        metadata
            .set_metadata_as_admin(HashMap::from([
                (SCORING_ENABLED_KEY.to_string(), "false".to_string()),
                (REQUEST_MUSIC_ENABLED_KEY.to_string(), "true".to_string()),
                ("other".to_string(), "x".to_string()),
            ]))
            .await
            .unwrap();

        let fetched = RoomMetadataBridge::fetch_flags(&metadata).await.unwrap();
        assert_eq!(fetched.len(), 2);

        let mut bridge = bridge(false);
        let changes = bridge.apply_fetched(&fetched);
        assert_eq!(changes, vec![FlagChange::Scoring(false)]);
    }
}
