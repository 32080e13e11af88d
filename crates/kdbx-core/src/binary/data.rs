//! A single pooled binary: attachment or custom icon content.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Cursor, Read, Write};
use std::path::PathBuf;

use chacha20::ChaCha20;
use cipher::StreamCipher;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use crate::binary::cache::BinaryCache;
use crate::error::Result;

/// Where the bytes of a [`BinaryData`] live.
#[derive(Debug, Clone)]
enum BinaryStore {
    /// Held fully in memory; chosen for small content when the caller's
    /// "is RAM sufficient" predicate allows it.
    Ram(Vec<u8>),
    /// Held in a temp file, encrypted at rest with the session cipher.
    File(PathBuf),
}

/// Pooled binary content with write-once streaming output that counts
/// bytes and hashes content in a single pass.
#[derive(Debug, Clone)]
pub struct BinaryData {
    compressed: bool,
    protected: bool,
    length: u64,
    hash: [u8; 32],
    store: BinaryStore,
}

impl BinaryData {
    pub fn new_in_ram(compressed: bool, protected: bool) -> Self {
        Self {
            compressed,
            protected,
            length: 0,
            hash: [0u8; 32],
            store: BinaryStore::Ram(Vec::new()),
        }
    }

    pub fn new_in_file(path: PathBuf, compressed: bool, protected: bool) -> Self {
        Self {
            compressed,
            protected,
            length: 0,
            hash: [0u8; 32],
            store: BinaryStore::File(path),
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn is_in_ram(&self) -> bool {
        matches!(self.store, BinaryStore::Ram(_))
    }

    /// Stored size in bytes (compressed size when compressed).
    pub fn size(&self) -> u64 {
        self.length
    }

    pub fn data_exists(&self) -> bool {
        self.length > 0
    }

    /// Content digest of the stored bytes. All zero until a write
    /// completed; dedup treats the zero hash as "no hash".
    pub fn binary_hash(&self) -> [u8; 32] {
        self.hash
    }

    /// A stream over the stored bytes. For file-backed content every
    /// byte read from disk passes through the session cipher.
    pub fn input_stream<'a>(&'a self, cache: &BinaryCache) -> Result<Box<dyn Read + 'a>> {
        match &self.store {
            BinaryStore::Ram(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
            BinaryStore::File(path) => {
                if self.length == 0 {
                    return Ok(Box::new(io::empty()));
                }
                let file = File::open(path)?;
                Ok(Box::new(CipherReader {
                    inner: BufReader::new(file),
                    cipher: cache.cipher_for(path),
                }))
            }
        }
    }

    /// Like [`BinaryData::input_stream`] but transparently gunzips
    /// compressed content.
    pub fn ungzip_input_stream<'a>(&'a self, cache: &BinaryCache) -> Result<Box<dyn Read + 'a>> {
        let inner = self.input_stream(cache)?;
        if self.compressed {
            Ok(Box::new(GzDecoder::new(inner)))
        } else {
            Ok(inner)
        }
    }

    /// A write-once output stream. Call [`BinaryWriter::finish`] to
    /// commit; the length and hash are then available without
    /// re-reading the content.
    pub fn output_stream<'a>(&'a mut self, cache: &BinaryCache) -> Result<BinaryWriter<'a>> {
        let sink = match &self.store {
            BinaryStore::Ram(_) => Sink::Ram(Vec::new()),
            BinaryStore::File(path) => {
                let cipher = cache.cipher_for(path);
                Sink::File(BufWriter::new(File::create(path)?), cipher)
            }
        };
        Ok(BinaryWriter {
            data: self,
            sink,
            hasher: Sha256::new(),
            count: 0,
        })
    }

    /// Gzip the content in place. A no-op when already compressed.
    pub fn compress(&mut self, cache: &BinaryCache) -> Result<()> {
        if self.compressed {
            return Ok(());
        }
        let mut staging = self.staging(cache);
        {
            let mut input = self.input_stream(cache)?;
            let writer = staging.output_stream(cache)?;
            let mut encoder = GzEncoder::new(writer, Compression::default());
            io::copy(&mut input, &mut encoder)?;
            encoder.finish()?.finish()?;
        }
        self.replace_content(staging)?;
        self.compressed = true;
        Ok(())
    }

    /// Gunzip the content in place. A no-op when not compressed.
    pub fn decompress(&mut self, cache: &BinaryCache) -> Result<()> {
        if !self.compressed {
            return Ok(());
        }
        let mut staging = self.staging(cache);
        {
            let mut input = GzDecoder::new(self.input_stream(cache)?);
            let mut writer = staging.output_stream(cache)?;
            io::copy(&mut input, &mut writer)?;
            writer.finish()?;
        }
        self.replace_content(staging)?;
        self.compressed = false;
        Ok(())
    }

    /// Release the underlying storage.
    pub fn clear(&mut self) -> Result<()> {
        match &mut self.store {
            BinaryStore::Ram(bytes) => bytes.clear(),
            BinaryStore::File(path) => match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        self.length = 0;
        self.hash = [0u8; 32];
        Ok(())
    }

    /// An empty sibling with the same storage kind and protection flag.
    fn staging(&self, cache: &BinaryCache) -> BinaryData {
        match &self.store {
            BinaryStore::Ram(_) => BinaryData::new_in_ram(false, self.protected),
            BinaryStore::File(_) => {
                BinaryData::new_in_file(cache.unused_file_path(), false, self.protected)
            }
        }
    }

    /// Adopt the content of `staging`, deleting our previous file if
    /// any. The staging file keeps its own path since the at-rest
    /// cipher nonce is derived from it.
    fn replace_content(&mut self, staging: BinaryData) -> Result<()> {
        if let BinaryStore::File(old) = &self.store {
            match fs::remove_file(old) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.store = staging.store;
        self.length = staging.length;
        self.hash = staging.hash;
        Ok(())
    }
}

enum Sink {
    Ram(Vec<u8>),
    File(BufWriter<File>, ChaCha20),
}

/// Streaming writer that counts and hashes plaintext while writing,
/// encrypting file-backed output through the session cipher.
pub struct BinaryWriter<'a> {
    data: &'a mut BinaryData,
    sink: Sink,
    hasher: Sha256,
    count: u64,
}

impl BinaryWriter<'_> {
    /// Commit the write: flush, then publish length and hash on the
    /// owning [`BinaryData`].
    pub fn finish(mut self) -> io::Result<()> {
        match self.sink {
            Sink::Ram(bytes) => {
                self.data.store = BinaryStore::Ram(bytes);
            }
            Sink::File(mut file, _) => {
                file.flush()?;
            }
        }
        self.data.length = self.count;
        self.data.hash = self.hasher.finalize().into();
        Ok(())
    }
}

impl Write for BinaryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.count += buf.len() as u64;
        match &mut self.sink {
            Sink::Ram(bytes) => bytes.extend_from_slice(buf),
            Sink::File(file, cipher) => {
                let mut encrypted = buf.to_vec();
                cipher.apply_keystream(&mut encrypted);
                file.write_all(&encrypted)?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.sink {
            Sink::Ram(_) => Ok(()),
            Sink::File(file, _) => file.flush(),
        }
    }
}

struct CipherReader<R: Read> {
    inner: R,
    cipher: ChaCha20,
}

impl<R: Read> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply_keystream(&mut buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_content(data: &mut BinaryData, cache: &BinaryCache, content: &[u8]) {
        let mut writer = data.output_stream(cache).unwrap();
        writer.write_all(content).unwrap();
        writer.finish().unwrap();
    }

    fn read_content(data: &BinaryData, cache: &BinaryCache) -> Vec<u8> {
        let mut out = Vec::new();
        data.input_stream(cache).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn ram_write_then_read() {
        let cache = BinaryCache::default();
        let mut data = BinaryData::new_in_ram(false, false);
        write_content(&mut data, &cache, b"attachment bytes");
        assert_eq!(data.size(), 16);
        assert_eq!(read_content(&data, &cache), b"attachment bytes");
    }

    #[test]
    fn hash_matches_independent_digest() {
        let cache = BinaryCache::default();
        let mut data = BinaryData::new_in_ram(false, false);
        write_content(&mut data, &cache, b"hash me");
        let expected: [u8; 32] = Sha256::digest(b"hash me").into();
        assert_eq!(data.binary_hash(), expected);
    }

    #[test]
    fn file_backed_content_is_encrypted_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path().to_path_buf());
        let path = cache.unused_file_path();
        let mut data = BinaryData::new_in_file(path.clone(), false, true);
        write_content(&mut data, &cache, b"top secret attachment");

        let on_disk = fs::read(&path).unwrap();
        assert_eq!(on_disk.len(), 21);
        assert_ne!(on_disk.as_slice(), b"top secret attachment");
        assert_eq!(read_content(&data, &cache), b"top secret attachment");
    }

    #[test]
    fn compress_roundtrip_for_various_sizes() {
        let cache = BinaryCache::default();
        for content in [
            Vec::new(),
            vec![0x42u8],
            vec![0x13u8; 3 * 1024 * 1024],
        ] {
            let mut data = BinaryData::new_in_ram(false, false);
            write_content(&mut data, &cache, &content);
            data.compress(&cache).unwrap();
            assert!(data.is_compressed());
            data.compress(&cache).unwrap(); // idempotent
            data.decompress(&cache).unwrap();
            assert!(!data.is_compressed());
            data.decompress(&cache).unwrap(); // idempotent
            assert_eq!(read_content(&data, &cache), content);
        }
    }

    #[test]
    fn compress_roundtrip_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path().to_path_buf());
        let mut data = BinaryData::new_in_file(cache.unused_file_path(), false, false);
        let content = vec![7u8; 200_000];
        write_content(&mut data, &cache, &content);
        data.compress(&cache).unwrap();
        assert!(data.size() < content.len() as u64);
        data.decompress(&cache).unwrap();
        assert_eq!(read_content(&data, &cache), content);
    }

    #[test]
    fn clear_releases_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path().to_path_buf());
        let path = cache.unused_file_path();
        let mut data = BinaryData::new_in_file(path.clone(), false, false);
        write_content(&mut data, &cache, b"bytes");
        assert!(path.exists());
        data.clear().unwrap();
        assert!(!path.exists());
        assert!(!data.data_exists());
        assert_eq!(data.binary_hash(), [0u8; 32]);
    }
}
