//! In-memory database: settings, the group/entry tree and binary pools.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::binary::{AttachmentPool, BinaryCache, BinaryData, CustomIconPool};
use crate::crypto::cipher::CipherEngine;
use crate::crypto::kdf::{Argon2Variant, KdfEngine, KdfParameters};
use crate::crypto::CrsAlgorithm;
use crate::element::{CustomData, DeletedObject, EntryKdbx, GroupKdbx};
use crate::error::{Error, Result};
use crate::format::{FILE_VERSION_31, FILE_VERSION_40, FILE_VERSION_41};
use crate::variant_dictionary::VariantDictionary;

/// Body compression applied before encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    None,
    GZip,
}

impl CompressionAlgorithm {
    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            0 => Ok(Self::None),
            1 => Ok(Self::GZip),
            other => Err(Error::Format(format!("unknown compression id {other}"))),
        }
    }

    pub fn id(self) -> u32 {
        match self {
            Self::None => 0,
            Self::GZip => 1,
        }
    }
}

/// Database metadata that carries its own change timestamp, so merges
/// can pick the newer side per setting.
#[derive(Debug, Clone)]
pub struct TimedSetting<T> {
    pub value: T,
    pub last_changed: DateTime<Utc>,
}

impl<T> TimedSetting<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            last_changed: Utc::now(),
        }
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.last_changed = Utc::now();
    }
}

/// A complete decrypted database.
///
/// Groups and entries live in flat maps keyed by UUID; the tree shape
/// is expressed through `parent`, `children` and `entries` links.
#[derive(Debug)]
pub struct DatabaseKdbx {
    pub name: TimedSetting<String>,
    pub description: TimedSetting<String>,
    pub default_username: TimedSetting<String>,
    pub color: String,
    pub maintenance_history_days: u32,
    /// When the master key was last changed
    pub master_key_changed: DateTime<Utc>,
    /// Recommended master key change interval in days, -1 when unset
    pub master_key_change_rec: i64,
    /// Forced master key change interval in days, -1 when unset
    pub master_key_change_force: i64,
    pub master_key_change_force_once: bool,
    pub recycle_bin_enabled: TimedSetting<bool>,
    pub recycle_bin_uuid: Uuid,
    pub entry_templates_group: TimedSetting<Uuid>,
    pub last_selected_group: Uuid,
    pub last_top_visible_group: Uuid,
    pub history_max_items: i32,
    pub history_max_size: i64,
    /// Covers color, compression, history limits, cipher and KDF
    pub settings_changed: DateTime<Utc>,
    pub compression: CompressionAlgorithm,
    pub cipher_engine: CipherEngine,
    pub kdf_parameters: KdfParameters,
    pub public_custom_data: VariantDictionary,
    pub custom_data: CustomData,
    pub custom_icons: CustomIconPool,
    pub attachments: AttachmentPool,
    pub binary_cache: BinaryCache,
    pub inner_random_stream: CrsAlgorithm,
    groups: HashMap<Uuid, GroupKdbx>,
    entries: HashMap<Uuid, EntryKdbx>,
    root: Uuid,
    deleted_objects: Vec<DeletedObject>,
}

impl DatabaseKdbx {
    pub const DEFAULT_HISTORY_MAX_ITEMS: i32 = 10;
    pub const DEFAULT_HISTORY_MAX_SIZE: i64 = 6 * 1024 * 1024;

    /// A fresh database with a root group and current-generation
    /// defaults (AES cipher, Argon2d KDF, gzip body).
    pub fn new(name: impl Into<String>) -> Self {
        let root = GroupKdbx::new("Root");
        let root_uuid = root.uuid;
        let mut groups = HashMap::new();
        groups.insert(root_uuid, root);

        Self {
            name: TimedSetting::new(name.into()),
            description: TimedSetting::new(String::new()),
            default_username: TimedSetting::new(String::new()),
            color: String::new(),
            maintenance_history_days: 365,
            master_key_changed: Utc::now(),
            master_key_change_rec: -1,
            master_key_change_force: -1,
            master_key_change_force_once: false,
            recycle_bin_enabled: TimedSetting::new(true),
            recycle_bin_uuid: Uuid::nil(),
            entry_templates_group: TimedSetting::new(Uuid::nil()),
            last_selected_group: Uuid::nil(),
            last_top_visible_group: Uuid::nil(),
            history_max_items: Self::DEFAULT_HISTORY_MAX_ITEMS,
            history_max_size: Self::DEFAULT_HISTORY_MAX_SIZE,
            settings_changed: Utc::now(),
            compression: CompressionAlgorithm::GZip,
            cipher_engine: CipherEngine::Aes256,
            kdf_parameters: KdfEngine::Argon2(Argon2Variant::Argon2d).default_parameters(),
            public_custom_data: VariantDictionary::new(),
            custom_data: CustomData::new(),
            custom_icons: CustomIconPool::new(),
            attachments: AttachmentPool::new(),
            binary_cache: BinaryCache::default(),
            inner_random_stream: CrsAlgorithm::ChaCha20,
            groups,
            entries: HashMap::new(),
            root: root_uuid,
            deleted_objects: Vec::new(),
        }
    }

    pub fn root_uuid(&self) -> Uuid {
        self.root
    }

    pub fn root(&self) -> &GroupKdbx {
        self.groups.get(&self.root).expect("root group exists")
    }

    /// Replace the tree with a freshly loaded one. The root must be
    /// present in `groups`.
    pub fn set_tree(
        &mut self,
        root: Uuid,
        groups: HashMap<Uuid, GroupKdbx>,
        entries: HashMap<Uuid, EntryKdbx>,
    ) -> Result<()> {
        if !groups.contains_key(&root) {
            return Err(Error::RootGroupMissing);
        }
        self.root = root;
        self.groups = groups;
        self.entries = entries;
        Ok(())
    }

    pub fn group(&self, uuid: &Uuid) -> Option<&GroupKdbx> {
        self.groups.get(uuid)
    }

    pub fn group_mut(&mut self, uuid: &Uuid) -> Option<&mut GroupKdbx> {
        self.groups.get_mut(uuid)
    }

    pub fn entry(&self, uuid: &Uuid) -> Option<&EntryKdbx> {
        self.entries.get(uuid)
    }

    pub fn entry_mut(&mut self, uuid: &Uuid) -> Option<&mut EntryKdbx> {
        self.entries.get_mut(uuid)
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupKdbx> {
        self.groups.values()
    }

    pub fn entries(&self) -> impl Iterator<Item = &EntryKdbx> {
        self.entries.values()
    }

    pub fn number_of_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn number_of_entries(&self) -> usize {
        self.entries.len()
    }

    /// Insert `group` as a child of `parent`.
    pub fn add_group_to(&mut self, mut group: GroupKdbx, parent: Uuid) -> Result<Uuid> {
        let parent_group = self
            .groups
            .get_mut(&parent)
            .ok_or(Error::Format(format!("unknown parent group {parent}")))?;
        let uuid = group.uuid;
        parent_group.add_child(uuid);
        group.parent = Some(parent);
        self.groups.insert(uuid, group);
        Ok(uuid)
    }

    /// Detach and drop a group. Its subtree must already be empty or
    /// relocated; dangling children are the caller's bug.
    pub fn remove_group(&mut self, uuid: &Uuid) -> Option<GroupKdbx> {
        let group = self.groups.remove(uuid)?;
        if let Some(parent) = group.parent {
            if let Some(parent_group) = self.groups.get_mut(&parent) {
                parent_group.remove_child(uuid);
            }
        }
        Some(group)
    }

    /// Insert `entry` into `parent`.
    pub fn add_entry_to(&mut self, mut entry: EntryKdbx, parent: Uuid) -> Result<Uuid> {
        let parent_group = self
            .groups
            .get_mut(&parent)
            .ok_or(Error::Format(format!("unknown parent group {parent}")))?;
        let uuid = entry.uuid;
        parent_group.add_entry(uuid);
        entry.parent = Some(parent);
        self.entries.insert(uuid, entry);
        Ok(uuid)
    }

    pub fn remove_entry(&mut self, uuid: &Uuid) -> Option<EntryKdbx> {
        let entry = self.entries.remove(uuid)?;
        if let Some(parent) = entry.parent {
            if let Some(parent_group) = self.groups.get_mut(&parent) {
                parent_group.remove_entry(uuid);
            }
        }
        Some(entry)
    }

    /// Relink an entry under a different group, recording the previous
    /// location and bumping the location timestamp.
    pub fn move_entry_to(&mut self, uuid: &Uuid, new_parent: Uuid) -> Result<()> {
        if !self.groups.contains_key(&new_parent) {
            return Err(Error::Format(format!("unknown parent group {new_parent}")));
        }
        let entry = self
            .entries
            .get_mut(uuid)
            .ok_or(Error::Format(format!("unknown entry {uuid}")))?;
        let old_parent = entry.parent;
        if old_parent == Some(new_parent) {
            return Ok(());
        }
        entry.previous_parent_group = old_parent;
        entry.parent = Some(new_parent);
        entry.times.touch_location_changed();
        if let Some(old) = old_parent {
            if let Some(group) = self.groups.get_mut(&old) {
                group.remove_entry(uuid);
            }
        }
        self.groups
            .get_mut(&new_parent)
            .expect("checked above")
            .add_entry(*uuid);
        Ok(())
    }

    /// Relink a group under a different parent. Refuses to create a
    /// cycle or to move the root.
    pub fn move_group_to(&mut self, uuid: &Uuid, new_parent: Uuid) -> Result<()> {
        if *uuid == self.root {
            return Err(Error::Format("cannot move the root group".into()));
        }
        if !self.groups.contains_key(&new_parent) {
            return Err(Error::Format(format!("unknown parent group {new_parent}")));
        }
        // Walking up from the target must not reach the moved group.
        let mut cursor = Some(new_parent);
        while let Some(current) = cursor {
            if current == *uuid {
                return Err(Error::Format("group move would create a cycle".into()));
            }
            cursor = self.groups.get(&current).and_then(|g| g.parent);
        }

        let group = self
            .groups
            .get_mut(uuid)
            .ok_or(Error::Format(format!("unknown group {uuid}")))?;
        let old_parent = group.parent;
        if old_parent == Some(new_parent) {
            return Ok(());
        }
        group.previous_parent_group = old_parent;
        group.parent = Some(new_parent);
        group.times.touch_location_changed();
        if let Some(old) = old_parent {
            if let Some(parent_group) = self.groups.get_mut(&old) {
                parent_group.remove_child(uuid);
            }
        }
        self.groups
            .get_mut(&new_parent)
            .expect("checked above")
            .add_child(*uuid);
        Ok(())
    }

    /// Group UUIDs in pre-order starting at the root.
    pub fn groups_preorder(&self) -> Vec<Uuid> {
        let mut out = Vec::with_capacity(self.groups.len());
        let mut stack = vec![self.root];
        while let Some(uuid) = stack.pop() {
            out.push(uuid);
            if let Some(group) = self.groups.get(&uuid) {
                // Reverse keeps sibling order after stack pop.
                stack.extend(group.children.iter().rev());
            }
        }
        out
    }

    pub fn deleted_objects(&self) -> &[DeletedObject] {
        &self.deleted_objects
    }

    pub fn get_deleted_object(&self, uuid: &Uuid) -> Option<&DeletedObject> {
        self.deleted_objects.iter().find(|d| d.uuid == *uuid)
    }

    pub fn add_deleted_object(&mut self, deleted: DeletedObject) {
        match self
            .deleted_objects
            .iter_mut()
            .find(|d| d.uuid == deleted.uuid)
        {
            Some(existing) if existing.deletion_time < deleted.deletion_time => {
                existing.deletion_time = deleted.deletion_time;
            }
            Some(_) => {}
            None => self.deleted_objects.push(deleted),
        }
    }

    pub fn remove_deleted_object(&mut self, uuid: &Uuid) {
        self.deleted_objects.retain(|d| d.uuid != *uuid);
    }

    /// Delete a group or entry, leaving a tombstone behind.
    pub fn delete_node(&mut self, uuid: &Uuid) {
        if self.entries.contains_key(uuid) {
            self.remove_entry(uuid);
        } else if self.groups.contains_key(uuid) {
            self.remove_group(uuid);
        }
        self.add_deleted_object(DeletedObject::new(*uuid));
    }

    /// A new pooled binary placed per the storage hint: in RAM when the
    /// caller judges it small enough, in an encrypted temp file
    /// otherwise.
    pub fn build_new_attachment(
        &self,
        in_ram: bool,
        compressed: bool,
        protected: bool,
    ) -> BinaryData {
        if in_ram {
            BinaryData::new_in_ram(compressed, protected)
        } else {
            BinaryData::new_in_file(self.binary_cache.unused_file_path(), compressed, protected)
        }
    }

    pub fn kdf_engine(&self) -> Result<KdfEngine> {
        KdfEngine::from_parameters(&self.kdf_parameters)
    }

    pub fn touch_settings_changed(&mut self) {
        self.settings_changed = Utc::now();
    }

    /// The lowest format version able to represent this database.
    pub fn min_kdbx_version(&self) -> u32 {
        if self.requires_kdbx41() {
            FILE_VERSION_41
        } else if self.requires_kdbx40() {
            FILE_VERSION_40
        } else {
            FILE_VERSION_31
        }
    }

    fn requires_kdbx41(&self) -> bool {
        self.custom_icons.contains_icon_with_name_or_modification()
            || self.custom_data.contains_item_with_modification_time()
            || self.groups.values().any(|g| {
                !g.tags.is_empty()
                    || g.previous_parent_group.is_some()
                    || g.custom_data.contains_item_with_modification_time()
            })
            || self.entries.values().any(|e| {
                e.previous_parent_group.is_some()
                    || !e.quality_check
                    || e.custom_data.contains_item_with_modification_time()
            })
    }

    fn requires_kdbx40(&self) -> bool {
        let aes_kdf = KdfEngine::from_parameters(&self.kdf_parameters)
            .map(|engine| matches!(engine, KdfEngine::Aes))
            .unwrap_or(false);
        !aes_kdf
            || !self.public_custom_data.is_empty()
            || !self.custom_data.is_empty()
            || self.groups.values().any(|g| !g.custom_data.is_empty())
            || self.entries.values().any(|e| !e.custom_data.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aes_kdf_database() -> DatabaseKdbx {
        let mut db = DatabaseKdbx::new("test");
        db.kdf_parameters = KdfEngine::Aes.default_parameters();
        db
    }

    #[test]
    fn new_database_has_a_root() {
        let db = DatabaseKdbx::new("vault");
        assert!(db.root().is_root());
        assert_eq!(db.number_of_groups(), 1);
    }

    #[test]
    fn add_and_remove_entry_keeps_links_consistent() {
        let mut db = DatabaseKdbx::new("vault");
        let root = db.root_uuid();
        let uuid = db.add_entry_to(EntryKdbx::new(), root).unwrap();
        assert_eq!(db.root().entries, vec![uuid]);
        assert_eq!(db.entry(&uuid).unwrap().parent, Some(root));

        db.remove_entry(&uuid);
        assert!(db.root().entries.is_empty());
        assert!(db.entry(&uuid).is_none());
    }

    #[test]
    fn move_entry_records_previous_parent() {
        let mut db = DatabaseKdbx::new("vault");
        let root = db.root_uuid();
        let sub = db.add_group_to(GroupKdbx::new("Sub"), root).unwrap();
        let entry = db.add_entry_to(EntryKdbx::new(), root).unwrap();

        db.move_entry_to(&entry, sub).unwrap();
        let moved = db.entry(&entry).unwrap();
        assert_eq!(moved.parent, Some(sub));
        assert_eq!(moved.previous_parent_group, Some(root));
        assert!(db.root().entries.is_empty());
        assert_eq!(db.group(&sub).unwrap().entries, vec![entry]);
    }

    #[test]
    fn group_move_into_own_subtree_is_rejected() {
        let mut db = DatabaseKdbx::new("vault");
        let root = db.root_uuid();
        let a = db.add_group_to(GroupKdbx::new("A"), root).unwrap();
        let b = db.add_group_to(GroupKdbx::new("B"), a).unwrap();
        assert!(db.move_group_to(&a, b).is_err());
        assert!(db.move_group_to(&a, a).is_err());
    }

    #[test]
    fn preorder_walk_visits_parents_before_children() {
        let mut db = DatabaseKdbx::new("vault");
        let root = db.root_uuid();
        let a = db.add_group_to(GroupKdbx::new("A"), root).unwrap();
        let b = db.add_group_to(GroupKdbx::new("B"), root).unwrap();
        let a1 = db.add_group_to(GroupKdbx::new("A1"), a).unwrap();

        let order = db.groups_preorder();
        assert_eq!(order, vec![root, a, a1, b]);
    }

    #[test]
    fn delete_node_leaves_a_tombstone() {
        let mut db = DatabaseKdbx::new("vault");
        let root = db.root_uuid();
        let entry = db.add_entry_to(EntryKdbx::new(), root).unwrap();
        db.delete_node(&entry);
        assert!(db.entry(&entry).is_none());
        assert!(db.get_deleted_object(&entry).is_some());
    }

    #[test]
    fn tombstone_keeps_latest_deletion_time() {
        let mut db = DatabaseKdbx::new("vault");
        let uuid = Uuid::new_v4();
        let early = DeletedObject::at(uuid, Utc::now() - chrono::Duration::hours(1));
        let late = DeletedObject::at(uuid, Utc::now());
        db.add_deleted_object(late);
        db.add_deleted_object(early);
        assert_eq!(db.get_deleted_object(&uuid).unwrap().deletion_time, late.deletion_time);
    }

    #[test]
    fn plain_aes_database_fits_kdbx3() {
        let db = aes_kdf_database();
        assert_eq!(db.min_kdbx_version(), FILE_VERSION_31);
    }

    #[test]
    fn argon2_kdf_requires_kdbx4() {
        let mut db = aes_kdf_database();
        db.kdf_parameters =
            KdfEngine::Argon2(Argon2Variant::Argon2d).default_parameters();
        assert_eq!(db.min_kdbx_version(), FILE_VERSION_40);
    }

    #[test]
    fn group_tags_require_kdbx41() {
        let mut db = aes_kdf_database();
        let root = db.root_uuid();
        let mut group = GroupKdbx::new("Tagged");
        group.tags = vec!["work".into()];
        db.add_group_to(group, root).unwrap();
        assert_eq!(db.min_kdbx_version(), FILE_VERSION_41);
    }

    #[test]
    fn disabled_quality_check_requires_kdbx41() {
        let mut db = aes_kdf_database();
        let root = db.root_uuid();
        let mut entry = EntryKdbx::new();
        entry.quality_check = false;
        db.add_entry_to(entry, root).unwrap();
        assert_eq!(db.min_kdbx_version(), FILE_VERSION_41);
    }
}
