//! Timestamps shared by groups and entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The full timestamp block a node carries. Merge decisions compare
/// `last_modification_time` for content and `location_changed` for
/// placement in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTimes {
    pub creation_time: DateTime<Utc>,
    pub last_modification_time: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub expires: bool,
    pub usage_count: u64,
    pub location_changed: DateTime<Utc>,
}

impl NodeTimes {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            creation_time: now,
            last_modification_time: now,
            last_access_time: now,
            expiry_time: now,
            expires: false,
            usage_count: 0,
            location_changed: now,
        }
    }

    /// Whether the node has passed its expiry time.
    pub fn is_expired(&self) -> bool {
        self.expires && self.expiry_time < Utc::now()
    }

    pub fn touch_accessed(&mut self) {
        self.last_access_time = Utc::now();
        self.usage_count += 1;
    }

    pub fn touch_modified(&mut self) {
        let now = Utc::now();
        self.last_modification_time = now;
        self.last_access_time = now;
    }

    pub fn touch_location_changed(&mut self) {
        self.location_changed = Utc::now();
    }
}

impl Default for NodeTimes {
    fn default() -> Self {
        Self::now()
    }
}
