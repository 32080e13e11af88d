//! SHA-256 hashed block stream (KDBX 3 body framing).
//!
//! Block layout: `u32 index, 32-byte SHA-256, u32 size, data`; the
//! stream ends with a zero-size block carrying an all-zero hash.

use byteorder::{ByteOrder, LittleEndian};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const BLOCK_SIZE: usize = 1024 * 1024;

/// Decode a hashed block stream, verifying each block digest.
pub fn read_stream(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0;
    let mut expected_index: u32 = 0;

    loop {
        if pos + 40 > data.len() {
            return Err(Error::Format("truncated hashed block header".into()));
        }
        let index = LittleEndian::read_u32(&data[pos..pos + 4]);
        let stored_hash = &data[pos + 4..pos + 36];
        let block_size = LittleEndian::read_u32(&data[pos + 36..pos + 40]) as usize;
        pos += 40;

        if index != expected_index {
            return Err(Error::Format(format!(
                "hashed block index {index} out of order (expected {expected_index})"
            )));
        }

        if block_size == 0 {
            if stored_hash.iter().any(|&b| b != 0) {
                return Err(Error::Integrity("final hashed block"));
            }
            break;
        }

        if pos + block_size > data.len() {
            return Err(Error::Format("truncated hashed block data".into()));
        }
        let block_data = &data[pos..pos + block_size];
        pos += block_size;

        if Sha256::digest(block_data).as_slice() != stored_hash {
            return Err(Error::Integrity("hashed block digest"));
        }

        out.extend_from_slice(block_data);
        expected_index += 1;
    }
    Ok(out)
}

/// Encode `data` as a hashed block stream.
pub fn write_stream(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 80);
    let mut index: u32 = 0;
    for chunk in data.chunks(BLOCK_SIZE) {
        out.extend_from_slice(&index.to_le_bytes());
        out.extend_from_slice(&Sha256::digest(chunk));
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(chunk);
        index += 1;
    }
    out.extend_from_slice(&index.to_le_bytes());
    out.extend_from_slice(&[0u8; 32]);
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = vec![0x42u8; 2 * 1024 * 1024 + 5];
        assert_eq!(read_stream(&write_stream(&data)).unwrap(), data);
    }

    #[test]
    fn corrupted_block_is_an_integrity_error() {
        let mut encoded = write_stream(b"some kdbx3 body");
        encoded[45] ^= 0x80;
        assert!(matches!(read_stream(&encoded), Err(Error::Integrity(_))));
    }

    #[test]
    fn out_of_order_block_is_a_format_error() {
        let mut encoded = write_stream(b"some kdbx3 body");
        encoded[0] = 7;
        assert!(matches!(read_stream(&encoded), Err(Error::Format(_))));
    }
}
