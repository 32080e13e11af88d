//! Legacy KDB fixed-size header. Read-only: enough to open an old
//! database as a merge source.

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::format::{KDB_SIG2, PM_DB_SIG1};

/// Total header size in bytes; the encrypted body starts right after.
pub const KDB_HEADER_SIZE: usize = 124;

/// Cipher/hash selection flags.
pub const FLAG_SHA2: u32 = 1;
pub const FLAG_RIJNDAEL: u32 = 2;
pub const FLAG_ARCFOUR: u32 = 4;
pub const FLAG_TWOFISH: u32 = 8;

/// The fixed 124-byte header of a legacy database.
#[derive(Debug, Clone)]
pub struct DatabaseHeaderKdb {
    pub flags: u32,
    pub version: u32,
    pub master_seed: [u8; 16],
    pub encryption_iv: [u8; 16],
    pub group_count: u32,
    pub entry_count: u32,
    /// SHA-256 over the decrypted body, checked after decryption
    pub contents_hash: [u8; 32],
    pub transform_seed: [u8; 32],
    pub key_rounds: u32,
}

impl DatabaseHeaderKdb {
    pub fn read(reader: &mut impl Read) -> Result<Self> {
        let mut buf = [0u8; KDB_HEADER_SIZE];
        reader
            .read_exact(&mut buf)
            .map_err(|_| Error::Format("truncated KDB header".into()))?;

        let sig1 = LittleEndian::read_u32(&buf[0..4]);
        let sig2 = LittleEndian::read_u32(&buf[4..8]);
        if sig1 != PM_DB_SIG1 || sig2 != KDB_SIG2 {
            return Err(Error::InvalidSignature);
        }

        let mut header = Self {
            flags: LittleEndian::read_u32(&buf[8..12]),
            version: LittleEndian::read_u32(&buf[12..16]),
            master_seed: [0u8; 16],
            encryption_iv: [0u8; 16],
            group_count: LittleEndian::read_u32(&buf[48..52]),
            entry_count: LittleEndian::read_u32(&buf[52..56]),
            contents_hash: [0u8; 32],
            transform_seed: [0u8; 32],
            key_rounds: LittleEndian::read_u32(&buf[120..124]),
        };
        header.master_seed.copy_from_slice(&buf[16..32]);
        header.encryption_iv.copy_from_slice(&buf[32..48]);
        header.contents_hash.copy_from_slice(&buf[56..88]);
        header.transform_seed.copy_from_slice(&buf[88..120]);

        if header.flags & (FLAG_RIJNDAEL | FLAG_TWOFISH) == 0 {
            return Err(Error::Format("KDB header selects no known cipher".into()));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_header_bytes() -> Vec<u8> {
        let mut buf = vec![0u8; KDB_HEADER_SIZE];
        buf[0..4].copy_from_slice(&PM_DB_SIG1.to_le_bytes());
        buf[4..8].copy_from_slice(&KDB_SIG2.to_le_bytes());
        buf[8..12].copy_from_slice(&(FLAG_SHA2 | FLAG_RIJNDAEL).to_le_bytes());
        buf[12..16].copy_from_slice(&0x0003_0004u32.to_le_bytes());
        buf[16..32].fill(0xA1); // master seed
        buf[32..48].fill(0xB2); // iv
        buf[48..52].copy_from_slice(&5u32.to_le_bytes()); // groups
        buf[52..56].copy_from_slice(&17u32.to_le_bytes()); // entries
        buf[56..88].fill(0xC3); // contents hash
        buf[88..120].fill(0xD4); // transform seed
        buf[120..124].copy_from_slice(&60_000u32.to_le_bytes());
        buf
    }

    #[test]
    fn reads_all_fields() {
        let bytes = sample_header_bytes();
        let header = DatabaseHeaderKdb::read(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.flags, FLAG_SHA2 | FLAG_RIJNDAEL);
        assert_eq!(header.group_count, 5);
        assert_eq!(header.entry_count, 17);
        assert_eq!(header.key_rounds, 60_000);
        assert_eq!(header.master_seed, [0xA1u8; 16]);
        assert_eq!(header.transform_seed, [0xD4u8; 32]);
    }

    #[test]
    fn kdbx_signature_is_rejected_here() {
        let mut bytes = sample_header_bytes();
        bytes[4..8].copy_from_slice(&super::super::KDBX_SIG2.to_le_bytes());
        assert!(matches!(
            DatabaseHeaderKdb::read(&mut Cursor::new(&bytes)),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn short_input_is_a_format_error() {
        let bytes = sample_header_bytes();
        assert!(matches!(
            DatabaseHeaderKdb::read(&mut Cursor::new(&bytes[..100])),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn cipherless_flags_are_rejected() {
        let mut bytes = sample_header_bytes();
        bytes[8..12].copy_from_slice(&FLAG_SHA2.to_le_bytes());
        assert!(matches!(
            DatabaseHeaderKdb::read(&mut Cursor::new(&bytes)),
            Err(Error::Format(_))
        ));
    }
}
