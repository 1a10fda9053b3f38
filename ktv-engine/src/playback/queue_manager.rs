//! Waiting queue projection
//!
//! **Responsibilities:**
//! - Hold the locally cached, ordered projection of the room's queue
//! - Apply change notifications idempotently (duplicate or out-of-order
//!   ADD/REMOVE deliveries never corrupt the projection)
//! - Paginate the initial fetch from the backing store
//!
//! The backing store is the source of truth; apart from the request-music
//! override the projection only follows change notifications.

use crate::error::Result;
use crate::ports::QueueStore;
use ktv_common::events::QueueChangeReason;
use ktv_common::QueueEntry;
use std::collections::HashSet;
use tracing::{debug, warn};

/// What a delta did to the projection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaOutcome {
    /// Projection differs from before the delta
    pub changed: bool,
    /// Queue went from empty to non-empty
    pub became_non_empty: bool,
    /// The active song is no longer queued
    pub active_removed: bool,
    /// Fresh copy of the active song's entry, if still queued
    pub active_entry: Option<QueueEntry>,
}

/// Ordered waiting queue; head is the song being loaded or played
#[derive(Debug, Clone, Default)]
pub struct WaitingQueue {
    entries: Vec<QueueEntry>,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn head(&self) -> Option<&QueueEntry> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, song_id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.song_id == song_id)
    }

    pub fn contains(&self, song_id: &str) -> bool {
        self.get(song_id).is_some()
    }

    pub fn song_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.song_id.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Apply a change notification
    ///
    /// `active_song_id` is the song currently loading or playing, if any.
    pub fn apply_delta(
        &mut self,
        reason: QueueChangeReason,
        changed: Vec<QueueEntry>,
        active_song_id: Option<&str>,
    ) -> DeltaOutcome {
        let was_empty = self.entries.is_empty();
        let before = self.entries.clone();
        let mut active_removed = false;

        match reason {
            QueueChangeReason::Add => {
                for entry in changed {
                    if self.contains(&entry.song_id) {
                        debug!("Ignoring duplicate ADD for {}", entry.song_id);
                        continue;
                    }
                    self.entries.push(entry);
                }
            }
            QueueChangeReason::Remove => {
                let removed: HashSet<&str> = changed.iter().map(|e| e.song_id.as_str()).collect();
                self.entries.retain(|e| !removed.contains(e.song_id.as_str()));
                active_removed = active_song_id
                    .map_or(false, |id| removed.contains(id) && before.iter().any(|e| e.song_id == id));
            }
            QueueChangeReason::OrderChanged => {
                if let Some(moved) = changed.into_iter().next() {
                    self.entries.retain(|e| e.song_id != moved.song_id);
                    let index = self.entries.len().min(1);
                    self.entries.insert(index, moved);
                }
            }
            QueueChangeReason::Unknown => {
                self.entries = dedupe(changed);
                active_removed = active_song_id.map_or(false, |id| !self.contains(id));
            }
        }

        DeltaOutcome {
            changed: self.entries != before,
            became_non_empty: was_empty && !self.entries.is_empty(),
            active_removed,
            active_entry: active_song_id.and_then(|id| self.get(id).cloned()),
        }
    }
}

/// Keep the first occurrence of each song id
fn dedupe(entries: Vec<QueueEntry>) -> Vec<QueueEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| {
            let fresh = seen.insert(e.song_id.clone());
            if !fresh {
                warn!("Dropping duplicate queue entry {}", e.song_id);
            }
            fresh
        })
        .collect()
}

/// Fetch the whole queue page by page
///
/// Stops when the store returns no cursor, an empty cursor, or an empty
/// page.
pub async fn fetch_all(store: &dyn QueueStore, page_size: usize) -> Result<Vec<QueueEntry>> {
    let mut entries = Vec::new();
    let mut cursor = None;
    loop {
        let page = store.get_page(cursor.take(), page_size).await?;
        let page_len = page.entries.len();
        entries.extend(page.entries);
        match page.next_cursor {
            Some(next) if !next.is_empty() && page_len > 0 => cursor = Some(next),
            _ => break,
        }
    }
    debug!("Fetched {} queued songs", entries.len());
    Ok(dedupe(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryQueueStore;

    fn entry(id: &str) -> QueueEntry {
        QueueEntry::new(id, format!("Song {}", id), "alice")
    }

    fn ids(queue: &WaitingQueue) -> Vec<&str> {
        queue.entries().iter().map(|e| e.song_id.as_str()).collect()
    }

    #[test]
    fn test_add_dedupes_by_song_id() {
        let mut queue = WaitingQueue::new();
        let outcome = queue.apply_delta(QueueChangeReason::Add, vec![entry("A")], None);
        assert!(outcome.became_non_empty);

        let outcome = queue.apply_delta(QueueChangeReason::Add, vec![entry("A"), entry("B")], None);
        assert!(!outcome.became_non_empty);
        assert_eq!(ids(&queue), vec!["A", "B"]);

        let outcome = queue.apply_delta(QueueChangeReason::Add, vec![entry("B")], None);
        assert!(!outcome.changed);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_flags_active_song() {
        let mut queue = WaitingQueue::new();
        queue.apply_delta(QueueChangeReason::Add, vec![entry("A"), entry("B")], None);

        let outcome = queue.apply_delta(QueueChangeReason::Remove, vec![entry("B")], Some("A"));
        assert!(!outcome.active_removed);
        assert_eq!(outcome.active_entry, Some(entry("A")));

        let outcome = queue.apply_delta(QueueChangeReason::Remove, vec![entry("A")], Some("A"));
        assert!(outcome.active_removed);
        assert!(outcome.active_entry.is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicate_remove_is_harmless() {
        let mut queue = WaitingQueue::new();
        queue.apply_delta(QueueChangeReason::Add, vec![entry("A"), entry("B")], None);
        queue.apply_delta(QueueChangeReason::Remove, vec![entry("A")], Some("A"));

        let outcome = queue.apply_delta(QueueChangeReason::Remove, vec![entry("A")], Some("B"));
        assert!(!outcome.changed);
        assert!(!outcome.active_removed);
        assert_eq!(ids(&queue), vec!["B"]);
    }

    #[test]
    fn test_order_changed_never_takes_the_head() {
        let mut queue = WaitingQueue::new();
        queue.apply_delta(
            QueueChangeReason::Add,
            vec![entry("A"), entry("B"), entry("C"), entry("D")],
            None,
        );

        queue.apply_delta(QueueChangeReason::OrderChanged, vec![entry("D")], Some("A"));
        assert_eq!(ids(&queue), vec!["A", "D", "B", "C"]);

        let mut single = WaitingQueue::new();
        single.apply_delta(QueueChangeReason::OrderChanged, vec![entry("X")], None);
        assert_eq!(ids(&single), vec!["X"]);
    }

    #[test]
    fn test_unknown_replaces_and_refreshes_active_entry() {
        let mut queue = WaitingQueue::new();
        queue.apply_delta(QueueChangeReason::Add, vec![entry("A"), entry("B")], None);

        let renamed = QueueEntry::new("A", "Song A (live)", "alice");
        let outcome = queue.apply_delta(
            QueueChangeReason::Unknown,
            vec![renamed.clone(), entry("C"), entry("C")],
            Some("A"),
        );
        assert_eq!(ids(&queue), vec!["A", "C"]);
        assert!(!outcome.active_removed);
        assert_eq!(outcome.active_entry, Some(renamed));

        let outcome = queue.apply_delta(QueueChangeReason::Unknown, vec![entry("C")], Some("A"));
        assert!(outcome.active_removed);
    }

    #[tokio::test]
    async fn test_fetch_all_follows_cursor() {
        let store = InMemoryQueueStore::with_entries((0..7).map(|i| entry(&i.to_string())).collect());
        let fetched = fetch_all(&store, 3).await.unwrap();
        assert_eq!(fetched.len(), 7);
        assert_eq!(fetched[6].song_id, "6");
        assert_eq!(store.page_requests(), 3);
    }

    #[tokio::test]
    async fn test_fetch_all_empty_store() {
        let store = InMemoryQueueStore::new();
        assert!(fetch_all(&store, 20).await.unwrap().is_empty());
    }
}
