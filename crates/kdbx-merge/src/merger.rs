//! The merge algorithm.

use std::io;

use tracing::warn;
use uuid::Uuid;

use kdbx_core::kdb::{DatabaseKdb, EntryKdb, GroupKdb};
use kdbx_core::{
    AttachmentPool, BinaryData, DatabaseKdbx, DeletedObject, EntryKdbx, Error, GroupKdbx, Result,
    TimedSetting,
};

/// RAM threshold for attachment copies when no predicate is supplied.
const DEFAULT_RAM_LIMIT: u64 = 1024 * 1024;

/// Counters describing what a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub groups_added: usize,
    pub groups_updated: usize,
    pub entries_added: usize,
    pub entries_updated: usize,
    pub nodes_deleted: usize,
    pub nodes_skipped: usize,
}

/// Merges a source database into a destination in place.
///
/// The destination must not be mutated externally for the duration of a
/// merge call; the source is only read.
pub struct Merger {
    is_ram_sufficient: Box<dyn Fn(u64) -> bool>,
}

impl Merger {
    pub fn new() -> Self {
        Self {
            is_ram_sufficient: Box::new(|size| size <= DEFAULT_RAM_LIMIT),
        }
    }

    /// Decide per attachment size whether a copy may live in RAM rather
    /// than an encrypted temp file.
    pub fn with_ram_predicate(predicate: impl Fn(u64) -> bool + 'static) -> Self {
        Self {
            is_ram_sufficient: Box::new(predicate),
        }
    }

    /// Merge a modern database into `destination`.
    pub fn merge_kdbx(
        &self,
        destination: &mut DatabaseKdbx,
        source: &DatabaseKdbx,
    ) -> Result<MergeStats> {
        let dest_root = destination.root_uuid();
        let src_root = source.root_uuid();
        if destination.group(&dest_root).is_none() || source.group(&src_root).is_none() {
            return Err(Error::RootGroupMissing);
        }

        let mut stats = MergeStats::default();
        merge_settings(destination, source);
        self.merge_custom_icons(destination, source)?;

        // Root groups keep their own identity per side; only the root's
        // content takes part in newest-wins.
        let src_root_group = source.group(&src_root).expect("checked above");
        let dst_modified = destination
            .group(&dest_root)
            .expect("checked above")
            .times
            .last_modification_time;
        if src_root_group.times.last_modification_time > dst_modified {
            let merged_custom = {
                let g = destination.group(&dest_root).expect("checked above");
                let mut merged = src_root_group.custom_data.clone();
                merged.merge_from(&g.custom_data);
                merged
            };
            let g = destination.group_mut(&dest_root).expect("checked above");
            g.update_with(src_root_group);
            g.custom_data = merged_custom;
            stats.groups_updated += 1;
        } else {
            destination
                .group_mut(&dest_root)
                .expect("checked above")
                .custom_data
                .merge_from(&src_root_group.custom_data);
        }

        // The two trees usually have different root ids; anything
        // parented at the source root lands under the destination root.
        let map_parent = move |uuid: Uuid| if uuid == src_root { dest_root } else { uuid };

        for group_uuid in source.groups_preorder() {
            if group_uuid != src_root {
                self.merge_group(destination, source, group_uuid, &map_parent, &mut stats);
            }
            let entry_uuids: Vec<Uuid> = source
                .group(&group_uuid)
                .map(|g| g.entries.clone())
                .unwrap_or_default();
            for entry_uuid in entry_uuids {
                self.merge_entry(destination, source, entry_uuid, &map_parent, &mut stats)?;
            }
        }

        self.apply_tombstones(destination, source, &mut stats);
        enforce_history_limits(destination);
        Ok(stats)
    }

    /// Merge a legacy database into `destination`. Legacy files carry
    /// no tombstones, custom data or history; this is a pure union with
    /// newest-wins on conflicting nodes.
    pub fn merge_kdb(
        &self,
        destination: &mut DatabaseKdbx,
        source: &DatabaseKdb,
    ) -> Result<MergeStats> {
        let dest_root = destination.root_uuid();
        let mut stats = MergeStats::default();

        for group in &source.groups {
            let uuid = source.group_uuid(group.id);
            let parent = source
                .parent_of(group.id)
                .map(|p| source.group_uuid(p.id))
                .unwrap_or(dest_root);
            if tombstone_postdates(destination, &uuid, group.last_modification_time) {
                continue;
            }
            destination.remove_deleted_object(&uuid);

            if let Some(existing) = destination.group_mut(&uuid) {
                if group.last_modification_time > existing.times.last_modification_time {
                    apply_kdb_group(existing, group);
                    stats.groups_updated += 1;
                }
            } else if destination.group(&parent).is_some() {
                let mut copy = GroupKdbx::with_uuid(uuid, group.title.clone());
                apply_kdb_group(&mut copy, group);
                destination.add_group_to(copy, parent)?;
                stats.groups_added += 1;
            } else {
                warn!(group = %uuid, "skipping legacy group: parent not present");
                stats.nodes_skipped += 1;
            }
        }

        for entry in &source.entries {
            if entry.is_meta_stream() {
                continue;
            }
            let parent = source.group_uuid(entry.group_id);
            if source.group(entry.group_id).is_none() || destination.group(&parent).is_none() {
                warn!(entry = %entry.uuid, "skipping legacy entry: group not present");
                stats.nodes_skipped += 1;
                continue;
            }
            if tombstone_postdates(destination, &entry.uuid, entry.last_modification_time) {
                continue;
            }
            destination.remove_deleted_object(&entry.uuid);

            if let Some(existing) = destination.entry(&entry.uuid) {
                if entry.last_modification_time > existing.times.last_modification_time {
                    let converted = self.entry_from_kdb(destination, entry)?;
                    let mut snapshot = destination.entry(&entry.uuid).expect("present").clone();
                    snapshot.history.clear();
                    snapshot.parent = None;
                    let existing = destination.entry_mut(&entry.uuid).expect("present");
                    existing.update_with(&converted, false);
                    if !existing.history_contains(&snapshot) {
                        existing.add_to_history(snapshot);
                    }
                    stats.entries_updated += 1;
                }
            } else {
                let converted = self.entry_from_kdb(destination, entry)?;
                destination.add_entry_to(converted, parent)?;
                stats.entries_added += 1;
            }
        }

        enforce_history_limits(destination);
        Ok(stats)
    }

    fn merge_group(
        &self,
        destination: &mut DatabaseKdbx,
        source: &DatabaseKdbx,
        uuid: Uuid,
        map_parent: &impl Fn(Uuid) -> Uuid,
        stats: &mut MergeStats,
    ) {
        let Some(src_group) = source.group(&uuid) else {
            return;
        };
        let mapped_parent = src_group.parent.map(map_parent);

        if tombstone_postdates(destination, &uuid, src_group.times.last_modification_time) {
            return;
        }
        destination.remove_deleted_object(&uuid);

        if destination.group(&uuid).is_none() {
            let Some(parent) = mapped_parent.filter(|p| destination.group(p).is_some()) else {
                warn!(group = %uuid, "skipping group: parent not present in destination");
                stats.nodes_skipped += 1;
                return;
            };
            let mut copy = src_group.clone();
            // Child links are rebuilt as the walk inserts them.
            copy.children.clear();
            copy.entries.clear();
            copy.parent = None;
            let _ = destination.add_group_to(copy, parent);
            stats.groups_added += 1;
            return;
        }

        let (dst_parent, dst_location_changed, dst_modified) = {
            let g = destination.group(&uuid).expect("present");
            (
                g.parent,
                g.times.location_changed,
                g.times.last_modification_time,
            )
        };

        if let Some(new_parent) = mapped_parent {
            if dst_parent != Some(new_parent)
                && src_group.times.location_changed > dst_location_changed
            {
                match destination.move_group_to(&uuid, new_parent) {
                    Ok(()) => {
                        let g = destination.group_mut(&uuid).expect("present");
                        g.times.location_changed = src_group.times.location_changed;
                        g.previous_parent_group = src_group.previous_parent_group;
                    }
                    Err(_) => {
                        warn!(group = %uuid, "skipping group move: target not reachable");
                        stats.nodes_skipped += 1;
                    }
                }
            }
        }

        if src_group.times.last_modification_time > dst_modified {
            // Custom data merges per key even though the record as a
            // whole is replaced.
            let merged_custom = {
                let g = destination.group(&uuid).expect("present");
                let mut merged = src_group.custom_data.clone();
                merged.merge_from(&g.custom_data);
                merged
            };
            let kept_location = destination
                .group(&uuid)
                .expect("present")
                .times
                .location_changed;
            let g = destination.group_mut(&uuid).expect("present");
            g.update_with(src_group);
            g.custom_data = merged_custom;
            if kept_location > g.times.location_changed {
                g.times.location_changed = kept_location;
            }
            stats.groups_updated += 1;
        } else {
            let g = destination.group_mut(&uuid).expect("present");
            g.custom_data.merge_from(&src_group.custom_data);
        }
    }

    fn merge_entry(
        &self,
        destination: &mut DatabaseKdbx,
        source: &DatabaseKdbx,
        uuid: Uuid,
        map_parent: &impl Fn(Uuid) -> Uuid,
        stats: &mut MergeStats,
    ) -> Result<()> {
        let Some(src_entry) = source.entry(&uuid) else {
            return Ok(());
        };
        let mapped_parent = src_entry.parent.map(map_parent);

        if tombstone_postdates(destination, &uuid, src_entry.times.last_modification_time) {
            return Ok(());
        }
        destination.remove_deleted_object(&uuid);

        if destination.entry(&uuid).is_none() {
            let Some(parent) = mapped_parent.filter(|p| destination.group(p).is_some()) else {
                warn!(entry = %uuid, "skipping entry: parent not present in destination");
                stats.nodes_skipped += 1;
                return Ok(());
            };
            let mut copy = src_entry.clone();
            copy.parent = None;
            self.import_attachments(destination, source, &mut copy)?;
            let mut history = std::mem::take(&mut copy.history);
            for row in &mut history {
                self.import_attachments(destination, source, row)?;
            }
            copy.history = history;
            destination.add_entry_to(copy, parent)?;
            stats.entries_added += 1;
            return Ok(());
        }

        let (dst_parent, dst_location_changed, dst_modified) = {
            let e = destination.entry(&uuid).expect("present");
            (
                e.parent,
                e.times.location_changed,
                e.times.last_modification_time,
            )
        };

        if let Some(new_parent) = mapped_parent {
            if dst_parent != Some(new_parent)
                && src_entry.times.location_changed > dst_location_changed
            {
                match destination.move_entry_to(&uuid, new_parent) {
                    Ok(()) => {
                        let e = destination.entry_mut(&uuid).expect("present");
                        e.times.location_changed = src_entry.times.location_changed;
                        e.previous_parent_group = src_entry.previous_parent_group;
                    }
                    Err(_) => {
                        warn!(entry = %uuid, "skipping entry move: target not reachable");
                        stats.nodes_skipped += 1;
                    }
                }
            }
        }

        if src_entry.times.last_modification_time > dst_modified {
            // The losing destination state survives as a history row.
            let mut snapshot = destination.entry(&uuid).expect("present").clone();
            snapshot.history.clear();
            snapshot.parent = None;

            let merged_custom = {
                let e = destination.entry(&uuid).expect("present");
                let mut merged = src_entry.custom_data.clone();
                merged.merge_from(&e.custom_data);
                merged
            };

            let mut incoming = src_entry.clone();
            incoming.parent = None;
            self.import_attachments(destination, source, &mut incoming)?;
            let mut history = std::mem::take(&mut incoming.history);
            for row in &mut history {
                self.import_attachments(destination, source, row)?;
            }
            incoming.history = history;

            // Rows only the destination knows fold into the winner's
            // history before it replaces the record.
            let dest_rows = destination.entry(&uuid).expect("present").history.clone();
            for row in dest_rows {
                if !incoming.history_contains(&row) {
                    incoming.add_to_history(row);
                }
            }

            let kept_location = destination
                .entry(&uuid)
                .expect("present")
                .times
                .location_changed;
            let e = destination.entry_mut(&uuid).expect("present");
            e.update_with(&incoming, true);
            e.custom_data = merged_custom;
            if kept_location > e.times.location_changed {
                e.times.location_changed = kept_location;
            }
            if !e.history_contains(&snapshot) {
                e.add_to_history(snapshot);
            }
            stats.entries_updated += 1;
        } else {
            // The source's older state and history fold into the
            // destination's history, deduplicated by timestamp so
            // repeated merges stay idempotent.
            let mut rows: Vec<EntryKdbx> = Vec::new();
            if src_entry.times.last_modification_time < dst_modified {
                let mut snapshot = src_entry.clone();
                snapshot.history.clear();
                snapshot.parent = None;
                rows.push(snapshot);
            }
            for row in &src_entry.history {
                let mut row = row.clone();
                row.parent = None;
                rows.push(row);
            }
            for mut row in rows {
                let already = destination
                    .entry(&uuid)
                    .expect("present")
                    .history_contains(&row);
                if already {
                    continue;
                }
                self.import_attachments(destination, source, &mut row)?;
                destination
                    .entry_mut(&uuid)
                    .expect("present")
                    .add_to_history(row);
            }
            destination
                .entry_mut(&uuid)
                .expect("present")
                .custom_data
                .merge_from(&src_entry.custom_data);
        }
        Ok(())
    }

    /// Rewrite an entry's attachment references against the destination
    /// pool, streaming content across when it is not already there.
    fn import_attachments(
        &self,
        destination: &mut DatabaseKdbx,
        source: &DatabaseKdbx,
        entry: &mut EntryKdbx,
    ) -> Result<()> {
        let references: Vec<(String, i32)> = entry
            .binaries
            .iter()
            .map(|(name, key)| (name.clone(), *key))
            .collect();
        for (name, src_key) in references {
            let Some(src_binary) = source.attachments.get(&src_key) else {
                warn!(entry = %entry.uuid, attachment = %name, "source attachment missing, dropping reference");
                entry.binaries.remove(&name);
                continue;
            };
            let key = self.import_binary(destination, source, src_binary)?;
            entry.binaries.insert(name, key);
        }
        Ok(())
    }

    /// Copy one binary into the destination attachment pool, reusing an
    /// existing key when identical content is already pooled.
    fn import_binary(
        &self,
        destination: &mut DatabaseKdbx,
        source: &DatabaseKdbx,
        src_binary: &BinaryData,
    ) -> Result<i32> {
        let hash = src_binary.binary_hash();
        if hash != [0u8; 32] {
            if let Some((key, _)) = destination
                .attachments
                .iter()
                .find(|(_, binary)| binary.binary_hash() == hash)
            {
                return Ok(*key);
            }
        }
        let copy = self.copy_binary(destination, source, src_binary)?;
        Ok(destination.attachments.put(None, copy))
    }

    fn copy_binary(
        &self,
        destination: &DatabaseKdbx,
        source: &DatabaseKdbx,
        src_binary: &BinaryData,
    ) -> Result<BinaryData> {
        let mut copy = destination.build_new_attachment(
            (self.is_ram_sufficient)(src_binary.size()),
            src_binary.is_compressed(),
            src_binary.is_protected(),
        );
        let mut input = src_binary.input_stream(&source.binary_cache)?;
        let mut output = copy.output_stream(&destination.binary_cache)?;
        io::copy(&mut input, &mut output)?;
        output.finish()?;
        Ok(copy)
    }

    fn merge_custom_icons(
        &self,
        destination: &mut DatabaseKdbx,
        source: &DatabaseKdbx,
    ) -> Result<()> {
        let uuids: Vec<Uuid> = source.custom_icons.iter().map(|(uuid, _)| *uuid).collect();
        for uuid in uuids {
            let src_binary = source.custom_icons.get(&uuid).expect("listed above");
            let src_meta = source.custom_icons.metadata(&uuid).cloned();
            let incoming_time = src_meta.as_ref().and_then(|m| m.last_modification_time);

            let replace = match destination.custom_icons.metadata(&uuid) {
                None => true,
                Some(existing) => match (existing.last_modification_time, incoming_time) {
                    (Some(ours), Some(theirs)) => theirs > ours,
                    (None, Some(_)) => true,
                    _ => false,
                },
            };
            if !replace {
                continue;
            }

            let copy = self.copy_binary(destination, source, src_binary)?;
            destination.custom_icons.put(Some(uuid), copy);
            if let Some(meta) = src_meta {
                if let Some(slot) = destination.custom_icons.metadata_mut(&uuid) {
                    *slot = meta;
                }
            }
        }
        Ok(())
    }

    fn apply_tombstones(
        &self,
        destination: &mut DatabaseKdbx,
        source: &DatabaseKdbx,
        stats: &mut MergeStats,
    ) {
        for tombstone in source.deleted_objects().to_vec() {
            if let Some(entry) = destination.entry(&tombstone.uuid) {
                if entry.times.last_modification_time < tombstone.deletion_time {
                    destination.remove_entry(&tombstone.uuid);
                    destination.add_deleted_object(tombstone);
                    stats.nodes_deleted += 1;
                }
                // A newer edit wins over the delete.
            } else if let Some(group) = destination.group(&tombstone.uuid) {
                if group.times.last_modification_time < tombstone.deletion_time {
                    self.delete_group_with_relocation(destination, source, tombstone);
                    stats.nodes_deleted += 1;
                }
            } else if destination.custom_icons.get(&tombstone.uuid).is_some() {
                // An icon without a modification time has no newer edit
                // that could outrank the deletion.
                let modified = destination
                    .custom_icons
                    .metadata(&tombstone.uuid)
                    .and_then(|m| m.last_modification_time);
                if modified.map_or(true, |m| m < tombstone.deletion_time) {
                    destination.custom_icons.remove(&tombstone.uuid);
                    destination.add_deleted_object(tombstone);
                    stats.nodes_deleted += 1;
                }
            } else {
                destination.add_deleted_object(tombstone);
            }
        }
    }

    /// Delete a tombstoned group. Children that are not themselves
    /// tombstoned move to the closest surviving ancestor instead of
    /// being dropped with their parent.
    fn delete_group_with_relocation(
        &self,
        destination: &mut DatabaseKdbx,
        source: &DatabaseKdbx,
        tombstone: DeletedObject,
    ) {
        let target = self.relocation_target(destination, source, tombstone.uuid);
        let (children, entries) = {
            let group = destination.group(&tombstone.uuid).expect("checked by caller");
            (group.children.clone(), group.entries.clone())
        };
        for child in children {
            if !self.is_doomed(destination, source, &child) {
                let _ = destination.move_group_to(&child, target);
            }
        }
        for entry in entries {
            if !self.is_doomed(destination, source, &entry) {
                let _ = destination.move_entry_to(&entry, target);
            }
        }
        destination.remove_group(&tombstone.uuid);
        destination.add_deleted_object(tombstone);
    }

    /// The first ancestor of `group` that is not itself about to be
    /// deleted by a source tombstone, defaulting to the root.
    fn relocation_target(
        &self,
        destination: &DatabaseKdbx,
        source: &DatabaseKdbx,
        group: Uuid,
    ) -> Uuid {
        let mut cursor = destination.group(&group).and_then(|g| g.parent);
        while let Some(current) = cursor {
            if current == destination.root_uuid() {
                break;
            }
            if !self.is_doomed(destination, source, &current) {
                return current;
            }
            cursor = destination.group(&current).and_then(|g| g.parent);
        }
        destination.root_uuid()
    }

    /// Whether a node in the destination will be deleted by one of the
    /// source's tombstones.
    fn is_doomed(&self, destination: &DatabaseKdbx, source: &DatabaseKdbx, uuid: &Uuid) -> bool {
        let Some(tombstone) = source.get_deleted_object(uuid) else {
            return false;
        };
        let modified = destination
            .entry(uuid)
            .map(|e| e.times.last_modification_time)
            .or_else(|| destination.group(uuid).map(|g| g.times.last_modification_time));
        matches!(modified, Some(m) if m < tombstone.deletion_time)
    }

    fn entry_from_kdb(
        &self,
        destination: &mut DatabaseKdbx,
        source_entry: &EntryKdb,
    ) -> Result<EntryKdbx> {
        let mut entry = EntryKdbx::with_uuid(source_entry.uuid);
        entry.icon_id = source_entry.icon_id;
        entry.set_title(source_entry.title.clone());
        entry.set_username(source_entry.username.clone());
        entry.set_password(source_entry.password.clone());
        entry.set_field("URL", source_entry.url.clone(), false);
        entry.set_field("Notes", source_entry.notes.clone(), false);
        entry.times.creation_time = source_entry.creation_time;
        entry.times.last_modification_time = source_entry.last_modification_time;
        entry.times.last_access_time = source_entry.last_access_time;
        entry.times.expiry_time = source_entry.expiry_time;
        entry.times.expires = source_entry.expires;
        entry.times.location_changed = source_entry.last_modification_time;

        if !source_entry.binary_data.is_empty() {
            let mut binary = destination.build_new_attachment(
                (self.is_ram_sufficient)(source_entry.binary_data.len() as u64),
                false,
                false,
            );
            {
                use std::io::Write;
                let mut writer = binary.output_stream(&destination.binary_cache)?;
                writer.write_all(&source_entry.binary_data)?;
                writer.finish()?;
            }
            let key = destination.attachments.put(None, binary);
            let name = if source_entry.binary_description.is_empty() {
                "attachment".to_string()
            } else {
                source_entry.binary_description.clone()
            };
            entry.put_attachment(name, key);
        }
        Ok(entry)
    }
}

impl Default for Merger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Merger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger").finish_non_exhaustive()
    }
}

fn merge_settings(destination: &mut DatabaseKdbx, source: &DatabaseKdbx) {
    merge_timed(&mut destination.name, &source.name);
    merge_timed(&mut destination.description, &source.description);
    merge_timed(&mut destination.default_username, &source.default_username);

    if source.recycle_bin_enabled.last_changed > destination.recycle_bin_enabled.last_changed {
        destination.recycle_bin_enabled = source.recycle_bin_enabled.clone();
        destination.recycle_bin_uuid = source.recycle_bin_uuid;
    }
    if source.entry_templates_group.last_changed > destination.entry_templates_group.last_changed {
        destination.entry_templates_group = source.entry_templates_group.clone();
    }
    if source.master_key_changed > destination.master_key_changed {
        destination.master_key_changed = source.master_key_changed;
        destination.master_key_change_rec = source.master_key_change_rec;
        destination.master_key_change_force = source.master_key_change_force;
        destination.master_key_change_force_once = source.master_key_change_force_once;
    }
    if source.settings_changed > destination.settings_changed {
        destination.settings_changed = source.settings_changed;
        destination.color = source.color.clone();
        destination.compression = source.compression;
        destination.cipher_engine = source.cipher_engine;
        destination.kdf_parameters = source.kdf_parameters.clone();
        destination.history_max_items = source.history_max_items;
        destination.history_max_size = source.history_max_size;
        destination.maintenance_history_days = source.maintenance_history_days;
    }
    destination.custom_data.merge_from(&source.custom_data);
}

fn merge_timed<T: Clone>(destination: &mut TimedSetting<T>, source: &TimedSetting<T>) {
    if source.last_changed > destination.last_changed {
        *destination = source.clone();
    }
}

fn tombstone_postdates(
    destination: &DatabaseKdbx,
    uuid: &Uuid,
    modified: chrono::DateTime<chrono::Utc>,
) -> bool {
    destination
        .get_deleted_object(uuid)
        .is_some_and(|t| t.deletion_time > modified)
}

fn enforce_history_limits(destination: &mut DatabaseKdbx) {
    let max_items = destination.history_max_items;
    let max_size = destination.history_max_size;
    let uuids: Vec<Uuid> = destination.entries().map(|e| e.uuid).collect();
    for uuid in uuids {
        if max_items >= 0 {
            if let Some(entry) = destination.entry_mut(&uuid) {
                entry.truncate_history(max_items as usize);
            }
        }
        if max_size < 0 {
            continue;
        }
        let sizes: Vec<u64> = match destination.entry(&uuid) {
            Some(entry) => entry
                .history
                .iter()
                .map(|row| history_row_size(row, &destination.attachments))
                .collect(),
            None => continue,
        };
        let mut total: u64 = sizes.iter().sum();
        let mut drop_oldest = 0;
        while drop_oldest < sizes.len() && total > max_size as u64 {
            total -= sizes[drop_oldest];
            drop_oldest += 1;
        }
        if drop_oldest > 0 {
            if let Some(entry) = destination.entry_mut(&uuid) {
                entry.history.drain(..drop_oldest);
            }
        }
    }
}

/// Approximate stored size of a history row: its string content plus
/// the pooled attachment bytes it references.
fn history_row_size(row: &EntryKdbx, attachments: &AttachmentPool) -> u64 {
    let mut size = 0u64;
    for (name, field) in &row.fields {
        size += (name.len() + field.value().len()) as u64;
    }
    size += (row.foreground_color.len() + row.background_color.len() + row.override_url.len())
        as u64;
    size += row.tags.iter().map(|t| t.len() as u64).sum::<u64>();
    for (name, key) in &row.binaries {
        size += name.len() as u64;
        if let Some(binary) = attachments.get(key) {
            size += binary.size();
        }
    }
    size
}

fn apply_kdb_group(group: &mut GroupKdbx, source: &GroupKdb) {
    group.title = source.title.clone();
    group.icon_id = source.icon_id;
    group.times.creation_time = source.creation_time;
    group.times.last_modification_time = source.last_modification_time;
    group.times.last_access_time = source.last_access_time;
    group.times.expiry_time = source.expiry_time;
    group.times.expires = source.expires;
    group.times.location_changed = source.last_modification_time;
}
