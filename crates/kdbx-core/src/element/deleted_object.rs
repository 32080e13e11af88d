//! Tombstones for removed groups and entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Records that the node with `uuid` was deleted at `deletion_time`.
/// During a merge a tombstone wins over a live node only when the
/// deletion is newer than the node's last modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedObject {
    pub uuid: Uuid,
    pub deletion_time: DateTime<Utc>,
}

impl DeletedObject {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            deletion_time: Utc::now(),
        }
    }

    pub fn at(uuid: Uuid, deletion_time: DateTime<Utc>) -> Self {
        Self {
            uuid,
            deletion_time,
        }
    }
}
