//! KDBX outer header: TLV field stream after the signature words.

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::crypto::cipher::CipherEngine;
use crate::crypto::kdf::{KdfEngine, KdfParameters};
use crate::crypto::CrsAlgorithm;
use crate::database::CompressionAlgorithm;
use crate::error::{Error, Result};
use crate::format::{
    is_version_supported, FILE_VERSION_40, FILE_VERSION_41, KDBX_SIG2, KDBX_SIG2_PRERELEASE,
    PM_DB_SIG1,
};
use crate::variant_dictionary::VariantDictionary;

mod field {
    pub const END: u8 = 0;
    pub const COMMENT: u8 = 1;
    pub const CIPHER_ID: u8 = 2;
    pub const COMPRESSION_FLAGS: u8 = 3;
    pub const MASTER_SEED: u8 = 4;
    pub const TRANSFORM_SEED: u8 = 5;
    pub const TRANSFORM_ROUNDS: u8 = 6;
    pub const ENCRYPTION_IV: u8 = 7;
    pub const INNER_RANDOM_STREAM_KEY: u8 = 8;
    pub const STREAM_START_BYTES: u8 = 9;
    pub const INNER_RANDOM_STREAM_ID: u8 = 10;
    pub const KDF_PARAMETERS: u8 = 11;
    pub const PUBLIC_CUSTOM_DATA: u8 = 12;
}

/// Parsed outer header state. For version 3 files the legacy transform
/// seed and round count are folded into AES KDF parameters, so one
/// representation serves both generations.
#[derive(Debug, Clone)]
pub struct DatabaseHeaderKdbx {
    pub version: u32,
    pub cipher_uuid: Uuid,
    pub compression: CompressionAlgorithm,
    pub master_seed: Vec<u8>,
    pub encryption_iv: Vec<u8>,
    pub kdf_parameters: KdfParameters,
    pub public_custom_data: VariantDictionary,
    /// Version 3 only; lives in the inner header for version 4
    pub inner_random_stream: CrsAlgorithm,
    /// Version 3 only
    pub inner_random_stream_key: Vec<u8>,
    /// Version 3 only
    pub stream_start_bytes: Vec<u8>,
}

impl DatabaseHeaderKdbx {
    /// A header with fresh random material for writing at `version`.
    pub fn randomized(
        version: u32,
        cipher: CipherEngine,
        compression: CompressionAlgorithm,
        mut kdf_parameters: KdfParameters,
    ) -> Result<Self> {
        let kdf = KdfEngine::from_parameters(&kdf_parameters)?;
        kdf.randomize(&mut kdf_parameters);

        let mut master_seed = vec![0u8; 32];
        OsRng.fill_bytes(&mut master_seed);
        let mut encryption_iv = vec![0u8; cipher.iv_length()];
        OsRng.fill_bytes(&mut encryption_iv);

        let (inner_random_stream, key_len) = if version < FILE_VERSION_40 {
            (CrsAlgorithm::Salsa20, 32)
        } else {
            (CrsAlgorithm::ChaCha20, 64)
        };
        let mut inner_random_stream_key = vec![0u8; key_len];
        OsRng.fill_bytes(&mut inner_random_stream_key);
        let mut stream_start_bytes = vec![0u8; 32];
        OsRng.fill_bytes(&mut stream_start_bytes);

        Ok(Self {
            version,
            cipher_uuid: cipher.uuid(),
            compression,
            master_seed,
            encryption_iv,
            kdf_parameters,
            public_custom_data: VariantDictionary::new(),
            inner_random_stream,
            inner_random_stream_key,
            stream_start_bytes,
        })
    }

    pub fn cipher_engine(&self) -> Result<CipherEngine> {
        CipherEngine::from_uuid(self.cipher_uuid)
    }

    pub fn kdf_engine(&self) -> Result<KdfEngine> {
        KdfEngine::from_parameters(&self.kdf_parameters)
    }

    /// Read and validate a header, returning it together with the raw
    /// bytes consumed so callers can digest them for integrity checks.
    pub fn read(reader: &mut impl Read) -> Result<(Self, Vec<u8>)> {
        let mut raw = Vec::with_capacity(256);

        let sig1 = read_u32(reader, &mut raw)?;
        let sig2 = read_u32(reader, &mut raw)?;
        if sig1 != PM_DB_SIG1 || (sig2 != KDBX_SIG2 && sig2 != KDBX_SIG2_PRERELEASE) {
            return Err(Error::InvalidSignature);
        }

        let version = read_u32(reader, &mut raw)?;
        if !is_version_supported(version, FILE_VERSION_41) {
            return Err(Error::UnsupportedVersion(version));
        }

        let mut header = Self {
            version,
            cipher_uuid: CipherEngine::Aes256.uuid(),
            compression: CompressionAlgorithm::None,
            master_seed: Vec::new(),
            encryption_iv: Vec::new(),
            kdf_parameters: KdfEngine::Aes.default_parameters(),
            public_custom_data: VariantDictionary::new(),
            inner_random_stream: CrsAlgorithm::Salsa20,
            inner_random_stream_key: Vec::new(),
            stream_start_bytes: Vec::new(),
        };

        loop {
            let id = read_bytes(reader, 1, &mut raw)?[0];
            let size = if version < FILE_VERSION_40 {
                u64::from(LittleEndian::read_u16(&read_bytes(reader, 2, &mut raw)?))
            } else {
                u64::from(LittleEndian::read_u32(&read_bytes(reader, 4, &mut raw)?))
            };
            let value = read_bytes(reader, size as usize, &mut raw)?;

            match id {
                field::END => break,
                field::COMMENT => {}
                field::CIPHER_ID => {
                    header.cipher_uuid = Uuid::from_slice(&value)
                        .map_err(|_| Error::Format("CipherID is not 16 bytes".into()))?;
                }
                field::COMPRESSION_FLAGS => {
                    header.compression =
                        CompressionAlgorithm::from_id(read_field_u32(&value, "CompressionFlags")?)?;
                }
                field::MASTER_SEED => header.master_seed = value,
                field::TRANSFORM_SEED => {
                    header
                        .kdf_parameters
                        .set_aes_seed(value)
                        .map_err(|_| Error::Format("TransformSeed on a non-AES KDF".into()))?;
                }
                field::TRANSFORM_ROUNDS => {
                    let rounds = read_field_u64(&value, "TransformRounds")?;
                    KdfEngine::Aes.set_key_rounds(&mut header.kdf_parameters, rounds)?;
                }
                field::ENCRYPTION_IV => header.encryption_iv = value,
                field::INNER_RANDOM_STREAM_KEY => header.inner_random_stream_key = value,
                field::STREAM_START_BYTES => header.stream_start_bytes = value,
                field::INNER_RANDOM_STREAM_ID => {
                    header.inner_random_stream =
                        CrsAlgorithm::from_id(read_field_u32(&value, "InnerRandomStreamID")?)?;
                }
                field::KDF_PARAMETERS => {
                    header.kdf_parameters = KdfParameters::deserialize(&value)?;
                }
                field::PUBLIC_CUSTOM_DATA => {
                    header.public_custom_data = VariantDictionary::deserialize(&value)?;
                }
                other => {
                    return Err(Error::Format(format!("unknown header field id {other}")));
                }
            }
        }

        if header.master_seed.is_empty() {
            return Err(Error::Format("header is missing the master seed".into()));
        }
        if header.encryption_iv.is_empty() {
            return Err(Error::Format("header is missing the encryption IV".into()));
        }

        Ok((header, raw))
    }

    /// Serialize the full header including signatures.
    pub fn write(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&PM_DB_SIG1.to_le_bytes());
        out.extend_from_slice(&KDBX_SIG2.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());

        let legacy = self.version < FILE_VERSION_40;

        write_field(&mut out, field::CIPHER_ID, self.cipher_uuid.as_bytes(), legacy)?;
        write_field(
            &mut out,
            field::COMPRESSION_FLAGS,
            &self.compression.id().to_le_bytes(),
            legacy,
        )?;
        write_field(&mut out, field::MASTER_SEED, &self.master_seed, legacy)?;
        write_field(&mut out, field::ENCRYPTION_IV, &self.encryption_iv, legacy)?;

        if legacy {
            // Old readers know only the fixed AES stretch, spelled out
            // as separate seed and round fields.
            let seed = self
                .kdf_parameters
                .aes_seed()
                .ok_or(Error::Format("version 3 output requires the AES KDF".into()))?;
            write_field(&mut out, field::TRANSFORM_SEED, &seed, legacy)?;
            let rounds = KdfEngine::Aes.key_rounds(&self.kdf_parameters);
            write_field(&mut out, field::TRANSFORM_ROUNDS, &rounds.to_le_bytes(), legacy)?;
            write_field(
                &mut out,
                field::INNER_RANDOM_STREAM_KEY,
                &self.inner_random_stream_key,
                legacy,
            )?;
            write_field(
                &mut out,
                field::STREAM_START_BYTES,
                &self.stream_start_bytes,
                legacy,
            )?;
            write_field(
                &mut out,
                field::INNER_RANDOM_STREAM_ID,
                &self.inner_random_stream.id().to_le_bytes(),
                legacy,
            )?;
        } else {
            write_field(
                &mut out,
                field::KDF_PARAMETERS,
                &self.kdf_parameters.serialize(),
                legacy,
            )?;
            if !self.public_custom_data.is_empty() {
                write_field(
                    &mut out,
                    field::PUBLIC_CUSTOM_DATA,
                    &self.public_custom_data.serialize(),
                    legacy,
                )?;
            }
        }

        // End marker carries a newline payload as a reader hint.
        write_field(&mut out, field::END, b"\r\n\r\n", legacy)?;
        Ok(out)
    }
}

fn read_bytes(reader: &mut impl Read, len: usize, raw: &mut Vec<u8>) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|_| Error::Format("truncated header".into()))?;
    raw.extend_from_slice(&buf);
    Ok(buf)
}

fn read_u32(reader: &mut impl Read, raw: &mut Vec<u8>) -> Result<u32> {
    let buf = read_bytes(reader, 4, raw)?;
    Ok(LittleEndian::read_u32(&buf))
}

fn read_field_u32(value: &[u8], name: &str) -> Result<u32> {
    if value.len() != 4 {
        return Err(Error::Format(format!("{name} is not 4 bytes")));
    }
    Ok(LittleEndian::read_u32(value))
}

fn read_field_u64(value: &[u8], name: &str) -> Result<u64> {
    if value.len() != 8 {
        return Err(Error::Format(format!("{name} is not 8 bytes")));
    }
    Ok(LittleEndian::read_u64(value))
}

fn write_field(out: &mut Vec<u8>, id: u8, value: &[u8], legacy: bool) -> Result<()> {
    out.push(id);
    if legacy {
        let len = u16::try_from(value.len())
            .map_err(|_| Error::Format("header field too large for version 3".into()))?;
        out.extend_from_slice(&len.to_le_bytes());
    } else {
        let len = u32::try_from(value.len())
            .map_err(|_| Error::Format("header field too large".into()))?;
        out.extend_from_slice(&len.to_le_bytes());
    }
    out.extend_from_slice(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::Argon2Variant;
    use std::io::Cursor;

    fn v4_header() -> DatabaseHeaderKdbx {
        DatabaseHeaderKdbx::randomized(
            FILE_VERSION_41,
            CipherEngine::Aes256,
            CompressionAlgorithm::GZip,
            KdfEngine::Argon2(Argon2Variant::Argon2id).default_parameters(),
        )
        .unwrap()
    }

    #[test]
    fn v4_roundtrip() {
        let header = v4_header();
        let bytes = header.write().unwrap();
        let (read, raw) = DatabaseHeaderKdbx::read(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(raw, bytes);
        assert_eq!(read.version, FILE_VERSION_41);
        assert_eq!(read.cipher_uuid, header.cipher_uuid);
        assert_eq!(read.compression, CompressionAlgorithm::GZip);
        assert_eq!(read.master_seed, header.master_seed);
        assert_eq!(read.encryption_iv, header.encryption_iv);
        assert_eq!(read.kdf_parameters, header.kdf_parameters);
    }

    #[test]
    fn v3_roundtrip_folds_legacy_kdf_fields() {
        let header = DatabaseHeaderKdbx::randomized(
            super::super::FILE_VERSION_31,
            CipherEngine::Aes256,
            CompressionAlgorithm::GZip,
            KdfEngine::Aes.default_parameters(),
        )
        .unwrap();
        let bytes = header.write().unwrap();
        let (read, _) = DatabaseHeaderKdbx::read(&mut Cursor::new(&bytes)).unwrap();
        assert!(matches!(read.kdf_engine().unwrap(), KdfEngine::Aes));
        assert_eq!(
            KdfEngine::Aes.key_rounds(&read.kdf_parameters),
            KdfEngine::Aes.key_rounds(&header.kdf_parameters)
        );
        assert_eq!(read.stream_start_bytes, header.stream_start_bytes);
        assert_eq!(read.inner_random_stream, CrsAlgorithm::Salsa20);
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut bytes = v4_header().write().unwrap();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            DatabaseHeaderKdbx::read(&mut Cursor::new(&bytes)),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn future_critical_version_is_rejected() {
        let mut bytes = v4_header().write().unwrap();
        bytes[8..12].copy_from_slice(&0x0005_0000u32.to_le_bytes());
        assert!(matches!(
            DatabaseHeaderKdbx::read(&mut Cursor::new(&bytes)),
            Err(Error::UnsupportedVersion(0x0005_0000))
        ));
    }

    #[test]
    fn future_minor_version_is_accepted() {
        let mut bytes = v4_header().write().unwrap();
        bytes[8..12].copy_from_slice(&0x0004_0002u32.to_le_bytes());
        assert!(DatabaseHeaderKdbx::read(&mut Cursor::new(&bytes)).is_ok());
    }

    #[test]
    fn truncated_header_is_a_format_error() {
        let bytes = v4_header().write().unwrap();
        let cut = &bytes[..bytes.len() / 2];
        assert!(matches!(
            DatabaseHeaderKdbx::read(&mut Cursor::new(cut)),
            Err(Error::Format(_))
        ));
    }
}
