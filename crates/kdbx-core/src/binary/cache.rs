//! Session-scoped cache state for binary content: the at-rest cipher key,
//! the temp directory for file-backed binaries, and a bounded LRU cache
//! with deterministic eviction.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chacha20::ChaCha20;
use cipher::KeyIvInit;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Holds the session key used to encrypt file-backed binaries at rest
/// and hands out unique temp file paths.
///
/// The key is random per session and never persisted; dropping the cache
/// makes any leftover temp files unreadable.
pub struct BinaryCache {
    key: [u8; 32],
    directory: PathBuf,
    file_increment: AtomicU64,
    session_id: u64,
}

impl BinaryCache {
    pub fn new(directory: PathBuf) -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self {
            key,
            directory,
            file_increment: AtomicU64::new(0),
            session_id: OsRng.next_u64(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// A fresh path for a new file-backed binary, unique per session.
    pub fn unused_file_path(&self) -> PathBuf {
        let increment = self.file_increment.fetch_add(1, Ordering::Relaxed);
        self.directory
            .join(format!("bin-{:016x}-{}", self.session_id, increment))
    }

    /// The at-rest cipher for a given file. The nonce is derived from
    /// the path so reads and writes of the same file always agree.
    pub fn cipher_for(&self, path: &Path) -> ChaCha20 {
        let digest = Sha256::digest(path.as_os_str().as_encoded_bytes());
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&digest[..12]);
        ChaCha20::new(&self.key.into(), &nonce.into())
    }
}

impl Default for BinaryCache {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl Drop for BinaryCache {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for BinaryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryCache")
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

/// A bounded least-recently-used cache with deterministic eviction,
/// independent of garbage-collection or weak-reference timing.
#[derive(Debug)]
pub struct LruCache<K: Eq + Hash + Clone, V> {
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "LRU cache capacity must be positive");
        Self {
            capacity,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.map.contains_key(key) {
            self.touch(key);
        }
        self.map.get(key)
    }

    /// Insert a value, evicting the least recently used entry when full.
    /// Returns the evicted pair, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.map.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return None;
        }
        self.order.push_back(key);
        if self.map.len() > self.capacity {
            let oldest = self.order.pop_front().expect("order tracks map");
            let evicted = self.map.remove(&oldest).expect("order tracks map");
            return Some((oldest, evicted));
        }
        None
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.order.retain(|k| k != key);
        self.map.remove(key)
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).expect("position is valid");
            self.order.push_back(k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipher::StreamCipher;

    #[test]
    fn cipher_is_stable_per_path() {
        let cache = BinaryCache::default();
        let path = cache.unused_file_path();
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        cache.cipher_for(&path).apply_keystream(&mut a);
        cache.cipher_for(&path).apply_keystream(&mut b);
        assert_eq!(a, b);

        let other = cache.unused_file_path();
        let mut c = [0u8; 16];
        cache.cipher_for(&other).apply_keystream(&mut c);
        assert_ne!(a, c);
    }

    #[test]
    fn file_paths_are_unique() {
        let cache = BinaryCache::default();
        assert_ne!(cache.unused_file_path(), cache.unused_file_path());
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut lru = LruCache::new(2);
        lru.put("a", 1);
        lru.put("b", 2);
        assert_eq!(lru.get(&"a"), Some(&1)); // refresh "a"
        let evicted = lru.put("c", 3);
        assert_eq!(evicted, Some(("b", 2)));
        assert_eq!(lru.get(&"a"), Some(&1));
        assert_eq!(lru.get(&"b"), None);
    }

    #[test]
    fn lru_put_of_existing_key_refreshes() {
        let mut lru = LruCache::new(2);
        lru.put("a", 1);
        lru.put("b", 2);
        lru.put("a", 10);
        assert_eq!(lru.put("c", 3), Some(("b", 2)));
        assert_eq!(lru.get(&"a"), Some(&10));
    }
}
