//! Queue change type definitions

use serde::{Deserialize, Serialize};

/// Why the room's waiting queue changed
///
/// Delivered by the queue backing store alongside the entries the change
/// touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum QueueChangeReason {
    /// Entries were appended
    Add,
    /// Entries were removed
    Remove,
    /// The first delta entry was promoted
    OrderChanged,
    /// Delta is the authoritative full queue
    Unknown,
}

impl std::fmt::Display for QueueChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueChangeReason::Add => write!(f, "Add"),
            QueueChangeReason::Remove => write!(f, "Remove"),
            QueueChangeReason::OrderChanged => write!(f, "OrderChanged"),
            QueueChangeReason::Unknown => write!(f, "Unknown"),
        }
    }
}
