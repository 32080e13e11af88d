//! Group types and operations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::element::custom_data::CustomData;
use crate::element::times::NodeTimes;

/// A group (folder) containing entries and subgroups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupKdbx {
    /// Unique identifier for this group
    pub uuid: Uuid,
    /// Group name
    pub title: String,
    /// Notes for this group
    pub notes: String,
    /// Standard icon index
    pub icon_id: u32,
    /// Custom icon reference into the icon pool, if any
    pub custom_icon_uuid: Option<Uuid>,
    /// Whether this group is expanded in the UI
    pub expanded: bool,
    /// Default auto-type sequence for entries in this group
    pub default_auto_type_sequence: String,
    /// Auto-type toggle; `None` inherits from the parent
    pub enable_auto_type: Option<bool>,
    /// Search toggle; `None` inherits from the parent
    pub enable_searching: Option<bool>,
    /// Last entry selected in the UI
    pub last_top_visible_entry: Uuid,
    /// Tags for organization (4.1 field)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Group this group was in before its last move (4.1 field)
    pub previous_parent_group: Option<Uuid>,
    /// Plugin data
    #[serde(default)]
    pub custom_data: CustomData,
    /// Timestamp block
    pub times: NodeTimes,
    /// UUID of the parent group (None for root)
    pub parent: Option<Uuid>,
    /// UUIDs of child groups
    #[serde(default)]
    pub children: Vec<Uuid>,
    /// UUIDs of entries in this group
    #[serde(default)]
    pub entries: Vec<Uuid>,
}

impl GroupKdbx {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            title: title.into(),
            notes: String::new(),
            icon_id: 0,
            custom_icon_uuid: None,
            expanded: true,
            default_auto_type_sequence: String::new(),
            enable_auto_type: None,
            enable_searching: None,
            last_top_visible_entry: Uuid::nil(),
            tags: Vec::new(),
            previous_parent_group: None,
            custom_data: CustomData::new(),
            times: NodeTimes::now(),
            parent: None,
            children: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn with_uuid(uuid: Uuid, title: impl Into<String>) -> Self {
        let mut group = Self::new(title);
        group.uuid = uuid;
        group
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn add_child(&mut self, child_uuid: Uuid) {
        if !self.children.contains(&child_uuid) {
            self.children.push(child_uuid);
        }
    }

    pub fn remove_child(&mut self, child_uuid: &Uuid) -> bool {
        let before = self.children.len();
        self.children.retain(|u| u != child_uuid);
        self.children.len() < before
    }

    pub fn add_entry(&mut self, entry_uuid: Uuid) {
        if !self.entries.contains(&entry_uuid) {
            self.entries.push(entry_uuid);
        }
    }

    pub fn remove_entry(&mut self, entry_uuid: &Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|u| u != entry_uuid);
        self.entries.len() < before
    }

    /// Copy the content of `source` into this group, leaving identity,
    /// children and tree placement untouched.
    pub fn update_with(&mut self, source: &GroupKdbx) {
        self.title = source.title.clone();
        self.notes = source.notes.clone();
        self.icon_id = source.icon_id;
        self.custom_icon_uuid = source.custom_icon_uuid;
        self.expanded = source.expanded;
        self.default_auto_type_sequence = source.default_auto_type_sequence.clone();
        self.enable_auto_type = source.enable_auto_type;
        self.enable_searching = source.enable_searching;
        self.last_top_visible_entry = source.last_top_visible_entry;
        self.tags = source.tags.clone();
        self.previous_parent_group = source.previous_parent_group;
        self.custom_data = source.custom_data.clone();
        self.times = source.times.clone();
    }

    pub fn is_expired(&self) -> bool {
        self.times.is_expired()
    }
}
