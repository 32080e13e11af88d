//! KDBX load flow: header, key derivation, decryption, integrity
//! checks and the inner header.
//!
//! The decrypted XML document itself is opaque to this layer and is
//! handed back as bytes for the document layer to parse.

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

use crate::binary::BinaryData;
use crate::credential::MasterCredential;
use crate::crypto::{hashed_block, hmac_block, CrsAlgorithm};
use crate::database::{CompressionAlgorithm, DatabaseKdbx};
use crate::error::{Error, Result};
use crate::format::kdbx_header::DatabaseHeaderKdbx;
use crate::format::FILE_VERSION_40;

mod inner_field {
    pub const END: u8 = 0;
    pub const STREAM_ID: u8 = 1;
    pub const STREAM_KEY: u8 = 2;
    pub const BINARY: u8 = 3;
}

/// Flag bit on an inner-header binary marking it memory-protected.
const BINARY_FLAG_PROTECTED: u8 = 0x01;

/// The result of loading a database file up to the XML boundary.
pub struct LoadedKdbx {
    /// A database primed with the header's settings and, for version 4,
    /// the attachment pool from the inner header.
    pub database: DatabaseKdbx,
    pub header: DatabaseHeaderKdbx,
    /// SHA-256 over the raw header; version 3 files repeat it inside
    /// the XML as `HeaderHash` for the document layer to verify.
    pub header_hash: [u8; 32],
    /// The decrypted, decompressed XML document bytes.
    pub xml: Vec<u8>,
    pub inner_random_stream: CrsAlgorithm,
    pub inner_random_stream_key: Vec<u8>,
}

/// Load a KDBX file: parse and validate the header, derive keys, check
/// integrity, decrypt and decompress the body.
pub fn load_kdbx(reader: &mut impl Read, credential: &MasterCredential) -> Result<LoadedKdbx> {
    let (header, raw_header) = DatabaseHeaderKdbx::read(reader)?;
    let header_hash: [u8; 32] = Sha256::digest(&raw_header).into();

    let composite_key = credential.composite_key()?;
    let kdf = header.kdf_engine()?;
    let transformed_key = kdf.transform(&composite_key, &header.kdf_parameters)?;
    let cipher = header.cipher_engine()?;
    let final_key = final_cipher_key(&header.master_seed, &transformed_key);

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest)?;

    let mut database = DatabaseKdbx::new(String::new());
    database.cipher_engine = cipher;
    database.compression = header.compression;
    database.kdf_parameters = header.kdf_parameters.clone();
    database.public_custom_data = header.public_custom_data.clone();

    let (xml, inner_random_stream, inner_random_stream_key);
    if header.version >= FILE_VERSION_40 {
        if rest.len() < 64 {
            return Err(Error::Format("file ends inside the header digests".into()));
        }
        let (stored_sha, tail) = rest.split_at(32);
        let (stored_hmac, body) = tail.split_at(32);

        if stored_sha != header_hash {
            return Err(Error::Format("header checksum mismatch".into()));
        }
        let base_key = hmac_block::base_hmac_key(&header.master_seed, &transformed_key);
        if hmac_block::header_hmac(&raw_header, &base_key) != stored_hmac {
            // Wrong credentials and header tampering are
            // indistinguishable here; both are integrity failures.
            return Err(Error::Integrity("header HMAC"));
        }

        let ciphertext = hmac_block::read_stream(body, &base_key)?;
        let plaintext = cipher.decrypt(&final_key, &header.encryption_iv, &ciphertext)?;
        let plaintext = decompress(header.compression, &plaintext)?;

        let (inner, xml_bytes) = read_inner_header(&plaintext, &mut database)?;
        xml = xml_bytes;
        inner_random_stream = inner.0;
        inner_random_stream_key = inner.1;
    } else {
        let plaintext = cipher.decrypt(&final_key, &header.encryption_iv, &rest)?;
        if plaintext.len() < 32 || plaintext[..32] != header.stream_start_bytes[..] {
            return Err(Error::Integrity("stream start bytes"));
        }
        let body = hashed_block::read_stream(&plaintext[32..])?;
        xml = decompress(header.compression, &body)?;
        inner_random_stream = header.inner_random_stream;
        inner_random_stream_key = header.inner_random_stream_key.clone();
    }

    database.inner_random_stream = inner_random_stream;
    debug!(
        version = format_args!("{:#010x}", header.version),
        attachments = database.attachments.len(),
        xml_bytes = xml.len(),
        "database body decrypted"
    );

    Ok(LoadedKdbx {
        database,
        header,
        header_hash,
        xml,
        inner_random_stream,
        inner_random_stream_key,
    })
}

/// The body cipher key: SHA-256 over master seed and transformed key.
pub fn final_cipher_key(master_seed: &[u8], transformed_key: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(master_seed);
    hasher.update(transformed_key);
    hasher.finalize().into()
}

/// The inner stream cipher key is a digest of the stored key material,
/// SHA-512 for ChaCha20 and SHA-256 otherwise.
pub fn inner_stream_cipher_key(algorithm: CrsAlgorithm, stored_key: &[u8]) -> Vec<u8> {
    match algorithm {
        CrsAlgorithm::ChaCha20 => Sha512::digest(stored_key).to_vec(),
        _ => Sha256::digest(stored_key).to_vec(),
    }
}

fn decompress(compression: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::GZip => {
            let mut out = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|_| Error::Format("corrupt gzip body".into()))?;
            Ok(out)
        }
    }
}

/// Parse the version 4 inner header, filling the attachment pool, and
/// return the inner stream parameters plus the trailing XML bytes.
fn read_inner_header(
    plaintext: &[u8],
    database: &mut DatabaseKdbx,
) -> Result<((CrsAlgorithm, Vec<u8>), Vec<u8>)> {
    let mut pos = 0;
    let mut stream = CrsAlgorithm::ChaCha20;
    let mut stream_key = Vec::new();

    loop {
        if pos + 5 > plaintext.len() {
            return Err(Error::Format("truncated inner header".into()));
        }
        let id = plaintext[pos];
        let len = LittleEndian::read_u32(&plaintext[pos + 1..pos + 5]) as usize;
        pos += 5;
        if pos + len > plaintext.len() {
            return Err(Error::Format("truncated inner header field".into()));
        }
        let value = &plaintext[pos..pos + len];
        pos += len;

        match id {
            inner_field::END => break,
            inner_field::STREAM_ID => {
                if value.len() != 4 {
                    return Err(Error::Format("inner stream id is not 4 bytes".into()));
                }
                stream = CrsAlgorithm::from_id(LittleEndian::read_u32(value))?;
            }
            inner_field::STREAM_KEY => stream_key = value.to_vec(),
            inner_field::BINARY => {
                if value.is_empty() {
                    return Err(Error::Format("inner binary without flag byte".into()));
                }
                let protected = value[0] & BINARY_FLAG_PROTECTED != 0;
                let mut binary = BinaryData::new_in_ram(false, protected);
                {
                    let mut writer = binary.output_stream(&database.binary_cache)?;
                    writer.write_all(&value[1..])?;
                    writer.finish()?;
                }
                database.attachments.put(None, binary);
            }
            other => {
                return Err(Error::Format(format!("unknown inner header field id {other}")));
            }
        }
    }

    Ok(((stream, stream_key), plaintext[pos..].to_vec()))
}
