//! HMAC-SHA-256 key schedule and block stream (KDBX 4).
//!
//! Every block of the ciphertext is covered by an HMAC keyed per block
//! index; the header itself is covered with the reserved index
//! `u64::MAX`. A single bit flip anywhere fails the load.

use byteorder::{ByteOrder, LittleEndian};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Block index reserved for the header HMAC.
const HEADER_BLOCK_INDEX: u64 = u64::MAX;

/// Payload bytes per block when writing.
const BLOCK_SIZE: usize = 1024 * 1024;

/// Base HMAC key: SHA-512 over master seed, transformed key and a
/// trailing 0x01 marker byte.
pub fn base_hmac_key(master_seed: &[u8], transformed_key: &[u8; 32]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(master_seed);
    hasher.update(transformed_key);
    hasher.update([0x01]);
    let mut out = [0u8; 64];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Per-block key: SHA-512 over the little-endian block index and the
/// base key.
fn block_hmac_key(block_index: u64, base_key: &[u8; 64]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(block_index.to_le_bytes());
    hasher.update(base_key);
    let mut out = [0u8; 64];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn block_hmac(block_index: u64, data: &[u8], base_key: &[u8; 64]) -> [u8; 32] {
    let key = block_hmac_key(block_index, base_key);
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts any key length");
    mac.update(&block_index.to_le_bytes());
    mac.update(&(data.len() as u32).to_le_bytes());
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// HMAC over the raw header bytes, keyed with the reserved index.
pub fn header_hmac(header: &[u8], base_key: &[u8; 64]) -> [u8; 32] {
    let key = block_hmac_key(HEADER_BLOCK_INDEX, base_key);
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts any key length");
    mac.update(header);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Read a complete HMAC block stream, verifying every block including
/// the empty terminator.
pub fn read_stream(data: &[u8], base_key: &[u8; 64]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0;
    let mut block_index: u64 = 0;

    loop {
        if pos + 36 > data.len() {
            return Err(Error::Format("truncated HMAC block header".into()));
        }
        let stored_hmac = &data[pos..pos + 32];
        let block_size = LittleEndian::read_u32(&data[pos + 32..pos + 36]) as usize;
        pos += 36;

        if pos + block_size > data.len() {
            return Err(Error::Format("truncated HMAC block data".into()));
        }
        let block_data = &data[pos..pos + block_size];
        pos += block_size;

        let computed = block_hmac(block_index, block_data, base_key);
        if stored_hmac != computed {
            return Err(Error::Integrity("block HMAC"));
        }

        if block_size == 0 {
            break;
        }
        out.extend_from_slice(block_data);
        block_index += 1;
    }
    Ok(out)
}

/// Encode `data` as an HMAC block stream, terminated by an empty block.
pub fn write_stream(data: &[u8], base_key: &[u8; 64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 64);
    let mut block_index: u64 = 0;
    for chunk in data.chunks(BLOCK_SIZE) {
        out.extend_from_slice(&block_hmac(block_index, chunk, base_key));
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(chunk);
        block_index += 1;
    }
    out.extend_from_slice(&block_hmac(block_index, &[], base_key));
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 64] {
        base_hmac_key(&[1u8; 32], &[2u8; 32])
    }

    #[test]
    fn stream_roundtrip() {
        let data = vec![0xABu8; 3 * 1024 * 1024 + 17]; // spans four blocks
        let encoded = write_stream(&data, &key());
        assert_eq!(read_stream(&encoded, &key()).unwrap(), data);
    }

    #[test]
    fn empty_stream_roundtrip() {
        let encoded = write_stream(&[], &key());
        assert_eq!(read_stream(&encoded, &key()).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn flipped_bit_fails_with_integrity_error() {
        let data = b"block stream payload".to_vec();
        let mut encoded = write_stream(&data, &key());
        let last = encoded.len() - 40;
        encoded[last] ^= 0x01;
        assert!(matches!(
            read_stream(&encoded, &key()),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let encoded = write_stream(b"payload", &key());
        let other = base_hmac_key(&[9u8; 32], &[2u8; 32]);
        assert!(matches!(
            read_stream(&encoded, &other),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn header_hmac_differs_from_block_hmac() {
        let header = b"header bytes";
        assert_ne!(header_hmac(header, &key()), block_hmac(0, header, &key()));
    }
}
