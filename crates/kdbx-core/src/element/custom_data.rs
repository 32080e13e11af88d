//! Plugin key/value storage attached to databases, groups and entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One custom data value. The modification time only exists in format
/// 4.1 files and is absent for older databases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomDataItem {
    pub value: String,
    pub last_modification_time: Option<DateTime<Utc>>,
}

impl CustomDataItem {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            last_modification_time: Some(Utc::now()),
        }
    }
}

/// Ordered key/value map reserved for plugins and integrations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomData {
    items: BTreeMap<String, CustomDataItem>,
}

impl CustomData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, key: &str) -> Option<&CustomDataItem> {
        self.items.get(key)
    }

    pub fn put(&mut self, key: impl Into<String>, item: CustomDataItem) {
        self.items.insert(key.into(), item);
    }

    pub fn remove(&mut self, key: &str) -> Option<CustomDataItem> {
        self.items.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CustomDataItem)> {
        self.items.iter()
    }

    /// Fold `other` in per key. A key found in both keeps the item with
    /// the newer modification time; an item without a timestamp loses
    /// to one that has one.
    pub fn merge_from(&mut self, other: &CustomData) {
        for (key, incoming) in &other.items {
            match self.items.get(key) {
                None => {
                    self.items.insert(key.clone(), incoming.clone());
                }
                Some(current) => {
                    let keep_incoming = match (
                        current.last_modification_time,
                        incoming.last_modification_time,
                    ) {
                        (Some(ours), Some(theirs)) => theirs > ours,
                        (None, Some(_)) => true,
                        _ => false,
                    };
                    if keep_incoming {
                        self.items.insert(key.clone(), incoming.clone());
                    }
                }
            }
        }
    }

    /// Whether any item carries a modification time, which requires
    /// format 4.1 to store.
    pub fn contains_item_with_modification_time(&self) -> bool {
        self.items
            .values()
            .any(|item| item.last_modification_time.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item_at(value: &str, offset_minutes: i64) -> CustomDataItem {
        CustomDataItem {
            value: value.into(),
            last_modification_time: Some(Utc::now() + Duration::minutes(offset_minutes)),
        }
    }

    #[test]
    fn merge_keeps_newer_item_per_key() {
        let mut ours = CustomData::new();
        ours.put("sync_id", item_at("old", -10));
        ours.put("local_only", item_at("kept", 0));

        let mut theirs = CustomData::new();
        theirs.put("sync_id", item_at("new", 0));
        theirs.put("added", item_at("fresh", 0));

        ours.merge_from(&theirs);
        assert_eq!(ours.get("sync_id").unwrap().value, "new");
        assert_eq!(ours.get("local_only").unwrap().value, "kept");
        assert_eq!(ours.get("added").unwrap().value, "fresh");
    }

    #[test]
    fn merge_prefers_timestamped_item_over_untimestamped() {
        let mut ours = CustomData::new();
        ours.put(
            "k",
            CustomDataItem {
                value: "untimed".into(),
                last_modification_time: None,
            },
        );
        let mut theirs = CustomData::new();
        theirs.put("k", item_at("timed", -60));
        ours.merge_from(&theirs);
        assert_eq!(ours.get("k").unwrap().value, "timed");
    }
}
