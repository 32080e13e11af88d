//! Legacy KDB database elements.
//!
//! The old format identifies groups by a 32-bit id and flattens the
//! tree into a level-annotated list. Merging into a modern database
//! maps those ids onto stable UUIDs derived from a per-database seed.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Title of the synthetic entries old clients used to smuggle metadata.
const META_STREAM_TITLE: &str = "Meta-Info";
const META_STREAM_USERNAME: &str = "SYSTEM";
const META_STREAM_URL: &str = "$";

/// A group in a legacy database.
#[derive(Debug, Clone)]
pub struct GroupKdb {
    pub id: u32,
    pub title: String,
    pub icon_id: u32,
    /// Depth in the tree; consecutive list order plus level encodes
    /// the hierarchy.
    pub level: u16,
    pub creation_time: DateTime<Utc>,
    pub last_modification_time: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub expires: bool,
}

impl GroupKdb {
    pub fn new(id: u32, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            icon_id: 0,
            level: 0,
            creation_time: now,
            last_modification_time: now,
            last_access_time: now,
            expiry_time: now,
            expires: false,
        }
    }
}

/// An entry in a legacy database.
#[derive(Debug, Clone)]
pub struct EntryKdb {
    pub uuid: Uuid,
    pub group_id: u32,
    pub icon_id: u32,
    pub title: String,
    pub username: String,
    pub password: String,
    pub url: String,
    pub notes: String,
    pub creation_time: DateTime<Utc>,
    pub last_modification_time: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub expires: bool,
    pub binary_description: String,
    pub binary_data: Vec<u8>,
}

impl EntryKdb {
    pub fn new(group_id: u32) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            group_id,
            icon_id: 0,
            title: String::new(),
            username: String::new(),
            password: String::new(),
            url: String::new(),
            notes: String::new(),
            creation_time: now,
            last_modification_time: now,
            last_access_time: now,
            expiry_time: now,
            expires: false,
            binary_description: String::new(),
            binary_data: Vec::new(),
        }
    }

    /// Whether this entry is a synthetic metadata carrier rather than a
    /// credential. Meta streams are skipped when importing or merging.
    pub fn is_meta_stream(&self) -> bool {
        self.title == META_STREAM_TITLE
            && self.username == META_STREAM_USERNAME
            && self.url == META_STREAM_URL
            && self.icon_id == 0
            && !self.notes.is_empty()
            && !self.binary_data.is_empty()
    }
}

/// A decoded legacy database.
#[derive(Debug, Default)]
pub struct DatabaseKdb {
    /// Groups in file order; `level` encodes nesting
    pub groups: Vec<GroupKdb>,
    pub entries: Vec<EntryKdb>,
    /// Seed for deriving stable group UUIDs from legacy integer ids
    pub uuid_seed: Uuid,
}

impl DatabaseKdb {
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            entries: Vec::new(),
            uuid_seed: Uuid::new_v4(),
        }
    }

    pub fn group(&self, id: u32) -> Option<&GroupKdb> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// The stable UUID a legacy group maps to: the seed with the group
    /// id folded into its low bits. Deterministic, so repeated merges
    /// of the same database match up.
    pub fn group_uuid(&self, id: u32) -> Uuid {
        Uuid::from_u128(self.uuid_seed.as_u128().wrapping_add(u128::from(id)))
    }

    /// The parent of a group, derived from list order and levels: the
    /// closest preceding group one level up.
    pub fn parent_of(&self, id: u32) -> Option<&GroupKdb> {
        let position = self.groups.iter().position(|g| g.id == id)?;
        let level = self.groups[position].level;
        if level == 0 {
            return None;
        }
        self.groups[..position]
            .iter()
            .rev()
            .find(|g| g.level + 1 == level)
    }

    pub fn entries_of(&self, group_id: u32) -> impl Iterator<Item = &EntryKdb> {
        self.entries.iter().filter(move |e| e.group_id == group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_stream_detection() {
        let mut entry = EntryKdb::new(1);
        entry.title = META_STREAM_TITLE.into();
        entry.username = META_STREAM_USERNAME.into();
        entry.url = META_STREAM_URL.into();
        entry.notes = "KPX_GROUP_TREE_STATE".into();
        entry.binary_data = vec![0u8; 4];
        assert!(entry.is_meta_stream());

        entry.title = "GitHub".into();
        assert!(!entry.is_meta_stream());
    }

    #[test]
    fn group_uuids_are_stable_and_distinct() {
        let db = DatabaseKdb::new();
        assert_eq!(db.group_uuid(3), db.group_uuid(3));
        assert_ne!(db.group_uuid(3), db.group_uuid(4));
    }

    #[test]
    fn parent_is_closest_preceding_shallower_group() {
        let mut db = DatabaseKdb::new();
        let mut top = GroupKdb::new(1, "Top");
        top.level = 0;
        let mut a = GroupKdb::new(2, "A");
        a.level = 1;
        let mut b = GroupKdb::new(3, "B");
        b.level = 1;
        db.groups = vec![top, a, b];

        assert!(db.parent_of(1).is_none());
        assert_eq!(db.parent_of(2).unwrap().id, 1);
        assert_eq!(db.parent_of(3).unwrap().id, 1);
    }
}
