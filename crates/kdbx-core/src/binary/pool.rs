//! Keyed pools of binary content with duplicate-aware serialization order.

use std::collections::BTreeMap;
use std::io::Read;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::binary::cache::{BinaryCache, LruCache};
use crate::binary::data::BinaryData;
use crate::error::Result;

/// Keys a pool can mint for newly added content.
pub trait PoolKey: Ord + Copy {
    /// A key not currently present in the pool.
    fn next_key(existing: &BTreeMap<Self, BinaryData>) -> Self;
}

impl PoolKey for i32 {
    fn next_key(existing: &BTreeMap<Self, BinaryData>) -> Self {
        existing.keys().next_back().map_or(0, |max| max + 1)
    }
}

impl PoolKey for Uuid {
    fn next_key(_existing: &BTreeMap<Self, BinaryData>) -> Self {
        Uuid::new_v4()
    }
}

/// A pool of binary content addressed by key. Iteration order follows
/// key order, so serialization is deterministic.
#[derive(Debug, Default)]
pub struct BinaryPool<K: PoolKey> {
    binaries: BTreeMap<K, BinaryData>,
}

/// One distinct binary with every pool key that references it.
#[derive(Debug)]
pub struct KeyBinary<'a, K> {
    pub binary: &'a BinaryData,
    pub keys: Vec<K>,
}

impl<K: PoolKey> BinaryPool<K> {
    pub fn new() -> Self {
        Self {
            binaries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.binaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binaries.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&BinaryData> {
        self.binaries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut BinaryData> {
        self.binaries.get_mut(key)
    }

    /// Insert content under `key`, or under a freshly minted key when
    /// `None`. Returns the key the content lives under.
    pub fn put(&mut self, key: Option<K>, binary: BinaryData) -> K {
        let key = key.unwrap_or_else(|| K::next_key(&self.binaries));
        self.binaries.insert(key, binary);
        key
    }

    pub fn remove(&mut self, key: &K) -> Option<BinaryData> {
        self.binaries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &BinaryData)> {
        self.binaries.iter()
    }

    /// Release every binary's storage and empty the pool.
    pub fn clear(&mut self) -> Result<()> {
        for binary in self.binaries.values_mut() {
            binary.clear()?;
        }
        self.binaries.clear();
        Ok(())
    }

    /// Whether the content under `key` is stored under at least one
    /// other key as well (matched by content hash).
    pub fn is_binary_duplicate(&self, key: &K) -> bool {
        let Some(hash) = self.binaries.get(key).map(BinaryData::binary_hash) else {
            return false;
        };
        if hash == [0u8; 32] {
            return false;
        }
        self.binaries
            .values()
            .filter(|b| b.binary_hash() == hash)
            .count()
            > 1
    }

    /// Distinct binaries in key order, each listing all keys that map
    /// to it. Serializing from this list writes shared content once.
    pub fn ordered_binaries_without_duplication(&self) -> Vec<KeyBinary<'_, K>> {
        let mut out: Vec<KeyBinary<'_, K>> = Vec::new();
        for (key, binary) in &self.binaries {
            let hash = binary.binary_hash();
            let existing = (hash != [0u8; 32])
                .then(|| {
                    out.iter_mut()
                        .find(|kb| kb.binary.binary_hash() == hash)
                })
                .flatten();
            match existing {
                Some(kb) => kb.keys.push(*key),
                None => out.push(KeyBinary {
                    binary,
                    keys: vec![*key],
                }),
            }
        }
        out
    }
}

/// Entry attachments, addressed by a compact integer index.
pub type AttachmentPool = BinaryPool<i32>;

/// Metadata of a custom icon; the image bytes live in the pool.
#[derive(Debug, Clone, Default)]
pub struct IconImageCustom {
    pub uuid: Uuid,
    pub name: String,
    pub last_modification_time: Option<DateTime<Utc>>,
}

impl IconImageCustom {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            name: String::new(),
            last_modification_time: None,
        }
    }
}

/// Custom icon images plus their metadata, with a small LRU of
/// decompressed image bytes for display.
#[derive(Debug)]
pub struct CustomIconPool {
    pool: BinaryPool<Uuid>,
    meta: BTreeMap<Uuid, IconImageCustom>,
    image_cache: LruCache<Uuid, Vec<u8>>,
}

impl CustomIconPool {
    const IMAGE_CACHE_CAPACITY: usize = 32;

    pub fn new() -> Self {
        Self {
            pool: BinaryPool::new(),
            meta: BTreeMap::new(),
            image_cache: LruCache::new(Self::IMAGE_CACHE_CAPACITY),
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn put(&mut self, uuid: Option<Uuid>, binary: BinaryData) -> Uuid {
        let uuid = self.pool.put(uuid, binary);
        self.meta
            .entry(uuid)
            .or_insert_with(|| IconImageCustom::new(uuid));
        uuid
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&BinaryData> {
        self.pool.get(uuid)
    }

    pub fn get_mut(&mut self, uuid: &Uuid) -> Option<&mut BinaryData> {
        self.pool.get_mut(uuid)
    }

    pub fn metadata(&self, uuid: &Uuid) -> Option<&IconImageCustom> {
        self.meta.get(uuid)
    }

    pub fn metadata_mut(&mut self, uuid: &Uuid) -> Option<&mut IconImageCustom> {
        self.meta.get_mut(uuid)
    }

    pub fn remove(&mut self, uuid: &Uuid) -> Option<BinaryData> {
        self.meta.remove(uuid);
        self.image_cache.remove(uuid);
        self.pool.remove(uuid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &BinaryData)> {
        self.pool.iter()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.meta.clear();
        self.pool.clear()
    }

    /// Decompressed image bytes, memoized in a bounded cache.
    pub fn image_bytes(&mut self, uuid: &Uuid, cache: &BinaryCache) -> Result<Option<Vec<u8>>> {
        if let Some(bytes) = self.image_cache.get(uuid) {
            return Ok(Some(bytes.clone()));
        }
        let Some(binary) = self.pool.get(uuid) else {
            return Ok(None);
        };
        let mut bytes = Vec::new();
        binary.ungzip_input_stream(cache)?.read_to_end(&mut bytes)?;
        self.image_cache.put(*uuid, bytes.clone());
        Ok(Some(bytes))
    }

    /// Whether any icon carries a name or a modification time. These
    /// fields only exist in format 4.1, so their presence raises the
    /// minimum version a database can be written as.
    pub fn contains_icon_with_name_or_modification(&self) -> bool {
        self.meta
            .values()
            .any(|m| !m.name.is_empty() || m.last_modification_time.is_some())
    }
}

impl Default for CustomIconPool {
    fn default() -> Self {
        Self::new()
    }
}
