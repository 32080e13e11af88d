//! Entry types and operations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::element::custom_data::CustomData;
use crate::element::times::NodeTimes;

/// Standard field names every client understands.
pub const FIELD_TITLE: &str = "Title";
pub const FIELD_USERNAME: &str = "UserName";
pub const FIELD_PASSWORD: &str = "Password";
pub const FIELD_URL: &str = "URL";
pub const FIELD_NOTES: &str = "Notes";

/// A string field of an entry. Protected values are zeroed on drop and
/// masked in debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct EntryField {
    value: String,
    #[zeroize(skip)]
    pub protected: bool,
}

impl EntryField {
    pub fn new(value: impl Into<String>, protected: bool) -> Self {
        Self {
            value: value.into(),
            protected,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for EntryField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.protected {
            write!(f, "EntryField(***)")
        } else {
            write!(f, "EntryField({:?})", self.value)
        }
    }
}

/// A credential entry.
///
/// Attachments are not stored inline: `binaries` maps an attachment
/// name to its key in the database's attachment pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryKdbx {
    /// Unique identifier for this entry
    pub uuid: Uuid,
    /// Standard icon index
    pub icon_id: u32,
    /// Custom icon reference into the icon pool, if any
    pub custom_icon_uuid: Option<Uuid>,
    /// Foreground color (e.g. "#FF0000"), empty when unset
    pub foreground_color: String,
    /// Background color, empty when unset
    pub background_color: String,
    /// URL override for auto-open
    pub override_url: String,
    /// Whether password quality estimation applies (4.1 field)
    pub quality_check: bool,
    /// Tags for organization
    #[serde(default)]
    pub tags: Vec<String>,
    /// Group the entry was in before its last move (4.1 field)
    pub previous_parent_group: Option<Uuid>,
    /// String fields by name, including the standard five
    #[serde(default)]
    pub fields: BTreeMap<String, EntryField>,
    /// Attachment name to attachment pool key
    #[serde(default)]
    pub binaries: BTreeMap<String, i32>,
    /// Older states of this entry, most recent last
    #[serde(default)]
    pub history: Vec<EntryKdbx>,
    /// Plugin data
    #[serde(default)]
    pub custom_data: CustomData,
    /// Timestamp block
    pub times: NodeTimes,
    /// UUID of the containing group
    pub parent: Option<Uuid>,
}

impl EntryKdbx {
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            icon_id: 0,
            custom_icon_uuid: None,
            foreground_color: String::new(),
            background_color: String::new(),
            override_url: String::new(),
            quality_check: true,
            tags: Vec::new(),
            previous_parent_group: None,
            fields: BTreeMap::new(),
            binaries: BTreeMap::new(),
            history: Vec::new(),
            custom_data: CustomData::new(),
            times: NodeTimes::now(),
            parent: None,
        }
    }

    pub fn with_uuid(uuid: Uuid) -> Self {
        let mut entry = Self::new();
        entry.uuid = uuid;
        entry
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(EntryField::value)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>, protected: bool) {
        self.fields
            .insert(name.into(), EntryField::new(value, protected));
    }

    pub fn title(&self) -> &str {
        self.field(FIELD_TITLE).unwrap_or("")
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.set_field(FIELD_TITLE, title, false);
    }

    pub fn username(&self) -> &str {
        self.field(FIELD_USERNAME).unwrap_or("")
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.set_field(FIELD_USERNAME, username, false);
    }

    pub fn password(&self) -> &str {
        self.field(FIELD_PASSWORD).unwrap_or("")
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.set_field(FIELD_PASSWORD, password, true);
    }

    pub fn url(&self) -> &str {
        self.field(FIELD_URL).unwrap_or("")
    }

    pub fn notes(&self) -> &str {
        self.field(FIELD_NOTES).unwrap_or("")
    }

    /// Attach a pooled binary under `name`, replacing any previous
    /// reference of that name.
    pub fn put_attachment(&mut self, name: impl Into<String>, pool_key: i32) {
        self.binaries.insert(name.into(), pool_key);
    }

    pub fn remove_attachment(&mut self, name: &str) -> Option<i32> {
        self.binaries.remove(name)
    }

    /// Snapshot the current state into history. The snapshot itself
    /// carries no history of its own.
    pub fn push_history(&mut self) {
        let mut snapshot = self.clone();
        snapshot.history.clear();
        self.history.push(snapshot);
    }

    /// Whether `other` is already represented in history, matched by
    /// modification time.
    pub fn history_contains(&self, other: &EntryKdbx) -> bool {
        self.history
            .iter()
            .any(|h| h.times.last_modification_time == other.times.last_modification_time)
    }

    /// Insert `other` into history in modification-time order.
    pub fn add_to_history(&mut self, other: EntryKdbx) {
        let at = self
            .history
            .partition_point(|h| h.times.last_modification_time <= other.times.last_modification_time);
        self.history.insert(at, other);
    }

    /// Drop the oldest states until at most `max_items` remain.
    pub fn truncate_history(&mut self, max_items: usize) {
        if self.history.len() > max_items {
            let excess = self.history.len() - max_items;
            self.history.drain(..excess);
        }
    }

    /// Copy the content of `source` into this entry, leaving identity
    /// and tree placement untouched.
    pub fn update_with(&mut self, source: &EntryKdbx, copy_history: bool) {
        self.icon_id = source.icon_id;
        self.custom_icon_uuid = source.custom_icon_uuid;
        self.foreground_color = source.foreground_color.clone();
        self.background_color = source.background_color.clone();
        self.override_url = source.override_url.clone();
        self.quality_check = source.quality_check;
        self.tags = source.tags.clone();
        self.previous_parent_group = source.previous_parent_group;
        self.fields = source.fields.clone();
        self.binaries = source.binaries.clone();
        self.custom_data = source.custom_data.clone();
        self.times = source.times.clone();
        if copy_history {
            self.history = source.history.clone();
        }
    }

    pub fn is_expired(&self) -> bool {
        self.times.is_expired()
    }
}

impl Default for EntryKdbx {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn standard_fields_roundtrip() {
        let mut entry = EntryKdbx::new();
        entry.set_title("GitHub");
        entry.set_username("user@example.com");
        entry.set_password("secret123");
        assert_eq!(entry.title(), "GitHub");
        assert_eq!(entry.username(), "user@example.com");
        assert_eq!(entry.password(), "secret123");
        assert!(entry.fields.get(FIELD_PASSWORD).unwrap().protected);
        assert_eq!(entry.url(), "");
    }

    #[test]
    fn protected_fields_are_masked_in_debug() {
        let field = EntryField::new("hunter2", true);
        assert_eq!(format!("{field:?}"), "EntryField(***)");
        let open = EntryField::new("visible", false);
        assert!(format!("{open:?}").contains("visible"));
    }

    #[test]
    fn history_snapshot_has_no_nested_history() {
        let mut entry = EntryKdbx::new();
        entry.set_title("v1");
        entry.push_history();
        entry.set_title("v2");
        entry.push_history();
        assert_eq!(entry.history.len(), 2);
        assert!(entry.history.iter().all(|h| h.history.is_empty()));
    }

    #[test]
    fn add_to_history_keeps_modification_order() {
        let mut entry = EntryKdbx::new();
        let now = Utc::now();
        for offset in [3i64, 1, 2] {
            let mut old = EntryKdbx::new();
            old.times.last_modification_time = now + Duration::minutes(offset);
            entry.add_to_history(old);
        }
        let times: Vec<_> = entry
            .history
            .iter()
            .map(|h| h.times.last_modification_time)
            .collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn truncate_history_drops_oldest_first() {
        let mut entry = EntryKdbx::new();
        let now = Utc::now();
        for offset in 0..5i64 {
            let mut old = EntryKdbx::new();
            old.set_title(format!("v{offset}"));
            old.times.last_modification_time = now + Duration::minutes(offset);
            entry.add_to_history(old);
        }
        entry.truncate_history(2);
        assert_eq!(entry.history.len(), 2);
        assert_eq!(entry.history[0].title(), "v3");
        assert_eq!(entry.history[1].title(), "v4");
    }
}
