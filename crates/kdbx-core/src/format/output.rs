//! KDBX save flow: minimum-version selection, fresh random material,
//! compression, encryption and integrity framing.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::credential::MasterCredential;
use crate::crypto::{hashed_block, hmac_block, CrsAlgorithm};
use crate::database::{CompressionAlgorithm, DatabaseKdbx};
use crate::error::{Error, Result};
use crate::format::input::final_cipher_key;
use crate::format::kdbx_header::DatabaseHeaderKdbx;
use crate::format::FILE_VERSION_40;

const INNER_FIELD_END: u8 = 0;
const INNER_FIELD_STREAM_ID: u8 = 1;
const INNER_FIELD_STREAM_KEY: u8 = 2;
const INNER_FIELD_BINARY: u8 = 3;
const BINARY_FLAG_PROTECTED: u8 = 0x01;

/// A serialized database plus the side data the document layer needs
/// to finish writing the XML.
pub struct SavedKdbx {
    pub bytes: Vec<u8>,
    pub version: u32,
    /// SHA-256 of the raw header; version 3 XML stores it as
    /// `HeaderHash`.
    pub header_hash: [u8; 32],
    /// Attachment pool key to inner-header binary index (version 4
    /// only; version 3 carries binaries inside the XML).
    pub binary_index_by_key: BTreeMap<i32, usize>,
    pub inner_random_stream: CrsAlgorithm,
    pub inner_random_stream_key: Vec<u8>,
}

/// Serialize `database` around the given XML document bytes, choosing
/// the lowest format version that can represent it.
pub fn save_kdbx(
    database: &DatabaseKdbx,
    xml: &[u8],
    credential: &MasterCredential,
) -> Result<SavedKdbx> {
    let version = database.min_kdbx_version();
    let header = DatabaseHeaderKdbx::randomized(
        version,
        database.cipher_engine,
        database.compression,
        database.kdf_parameters.clone(),
    )?;
    let header_bytes = header.write()?;
    let header_hash: [u8; 32] = Sha256::digest(&header_bytes).into();

    let composite_key = credential.composite_key()?;
    let kdf = header.kdf_engine()?;
    let transformed_key = kdf.transform(&composite_key, &header.kdf_parameters)?;
    let final_key = final_cipher_key(&header.master_seed, &transformed_key);
    let cipher = header.cipher_engine()?;

    let mut binary_index_by_key = BTreeMap::new();
    let mut out = header_bytes.clone();

    if version >= FILE_VERSION_40 {
        let mut body = write_inner_header(database, &header, &mut binary_index_by_key)?;
        body.extend_from_slice(xml);
        let body = compress(database.compression, &body)?;
        let ciphertext = cipher.encrypt(&final_key, &header.encryption_iv, &body)?;

        let base_key = hmac_block::base_hmac_key(&header.master_seed, &transformed_key);
        out.extend_from_slice(&header_hash);
        out.extend_from_slice(&hmac_block::header_hmac(&header_bytes, &base_key));
        out.extend_from_slice(&hmac_block::write_stream(&ciphertext, &base_key));
    } else {
        let body = compress(database.compression, xml)?;
        let mut plaintext = header.stream_start_bytes.clone();
        plaintext.extend_from_slice(&hashed_block::write_stream(&body));
        out.extend_from_slice(&cipher.encrypt(&final_key, &header.encryption_iv, &plaintext)?);
    }

    debug!(
        version = format_args!("{version:#010x}"),
        bytes = out.len(),
        "database serialized"
    );

    Ok(SavedKdbx {
        bytes: out,
        version,
        header_hash,
        binary_index_by_key,
        inner_random_stream: header.inner_random_stream,
        inner_random_stream_key: header.inner_random_stream_key,
    })
}

fn compress(compression: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::GZip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
    }
}

/// Serialize the version 4 inner header. Identical attachment content
/// is written once; every pool key that shares it maps to the same
/// binary index.
fn write_inner_header(
    database: &DatabaseKdbx,
    header: &DatabaseHeaderKdbx,
    binary_index_by_key: &mut BTreeMap<i32, usize>,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    write_inner_field(
        &mut out,
        INNER_FIELD_STREAM_ID,
        &header.inner_random_stream.id().to_le_bytes(),
    )?;
    write_inner_field(
        &mut out,
        INNER_FIELD_STREAM_KEY,
        &header.inner_random_stream_key,
    )?;

    for (index, key_binary) in database
        .attachments
        .ordered_binaries_without_duplication()
        .iter()
        .enumerate()
    {
        let mut value = vec![if key_binary.binary.is_protected() {
            BINARY_FLAG_PROTECTED
        } else {
            0
        }];
        key_binary
            .binary
            .ungzip_input_stream(&database.binary_cache)?
            .read_to_end(&mut value)?;
        write_inner_field(&mut out, INNER_FIELD_BINARY, &value)?;
        for key in &key_binary.keys {
            binary_index_by_key.insert(*key, index);
        }
    }

    write_inner_field(&mut out, INNER_FIELD_END, &[])?;
    Ok(out)
}

fn write_inner_field(out: &mut Vec<u8>, id: u8, value: &[u8]) -> Result<()> {
    let len = u32::try_from(value.len())
        .map_err(|_| Error::Format("inner header field too large".into()))?;
    out.push(id);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::BinaryData;
    use crate::crypto::kdf::KdfEngine;
    use crate::format::input::load_kdbx;
    use crate::format::FILE_VERSION_31;
    use std::io::Cursor;

    fn credential() -> MasterCredential {
        MasterCredential::from_password("correct horse battery staple")
    }

    fn fast_argon2_database() -> DatabaseKdbx {
        let mut db = DatabaseKdbx::new("vault");
        // Small KDF cost keeps the tests quick.
        let engine = db.kdf_engine().unwrap();
        engine
            .set_memory_usage(&mut db.kdf_parameters, 1024 * 8)
            .unwrap();
        engine.set_key_rounds(&mut db.kdf_parameters, 1).unwrap();
        engine.set_parallelism(&mut db.kdf_parameters, 1).unwrap();
        db
    }

    fn pooled_binary(db: &DatabaseKdbx, content: &[u8], protected: bool) -> BinaryData {
        let mut binary = db.build_new_attachment(true, false, protected);
        let mut writer = binary.output_stream(&db.binary_cache).unwrap();
        writer.write_all(content).unwrap();
        writer.finish().unwrap();
        binary
    }

    #[test]
    fn v4_save_then_load_roundtrips_xml_and_attachments() {
        let mut db = fast_argon2_database();
        let a = pooled_binary(&db, b"attachment one", true);
        let b = pooled_binary(&db, b"attachment two", false);
        db.attachments.put(None, a);
        db.attachments.put(None, b);

        let xml = b"<KeePassFile><Root/></KeePassFile>";
        let saved = save_kdbx(&db, xml, &credential()).unwrap();
        assert!(saved.version >= FILE_VERSION_40);

        let loaded = load_kdbx(&mut Cursor::new(&saved.bytes), &credential()).unwrap();
        assert_eq!(loaded.xml, xml);
        assert_eq!(loaded.database.attachments.len(), 2);
        let first = loaded.database.attachments.get(&0).unwrap();
        assert!(first.is_protected());
        let mut content = Vec::new();
        first
            .input_stream(&loaded.database.binary_cache)
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, b"attachment one");
    }

    #[test]
    fn duplicate_attachments_are_written_once() {
        let mut db = fast_argon2_database();
        let a = pooled_binary(&db, b"same bytes", false);
        let b = pooled_binary(&db, b"same bytes", false);
        db.attachments.put(None, a);
        db.attachments.put(None, b);

        let saved = save_kdbx(&db, b"<x/>", &credential()).unwrap();
        assert_eq!(saved.binary_index_by_key.get(&0), Some(&0));
        assert_eq!(saved.binary_index_by_key.get(&1), Some(&0));

        let loaded = load_kdbx(&mut Cursor::new(&saved.bytes), &credential()).unwrap();
        assert_eq!(loaded.database.attachments.len(), 1);
    }

    #[test]
    fn aes_kdf_database_prefers_version_3() {
        let mut db = DatabaseKdbx::new("vault");
        db.kdf_parameters = KdfEngine::Aes.default_parameters();
        KdfEngine::Aes
            .set_key_rounds(&mut db.kdf_parameters, 64)
            .unwrap();

        let xml = b"<KeePassFile/>";
        let saved = save_kdbx(&db, xml, &credential()).unwrap();
        assert_eq!(saved.version, FILE_VERSION_31);

        let loaded = load_kdbx(&mut Cursor::new(&saved.bytes), &credential()).unwrap();
        assert_eq!(loaded.xml, xml);
        assert_eq!(loaded.inner_random_stream, CrsAlgorithm::Salsa20);
    }

    #[test]
    fn wrong_password_is_an_integrity_error() {
        let db = fast_argon2_database();
        let saved = save_kdbx(&db, b"<x/>", &credential()).unwrap();
        let wrong = MasterCredential::from_password("not the password");
        assert!(matches!(
            load_kdbx(&mut Cursor::new(&saved.bytes), &wrong),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn v3_wrong_password_is_an_integrity_error() {
        let mut db = DatabaseKdbx::new("vault");
        db.kdf_parameters = KdfEngine::Aes.default_parameters();
        KdfEngine::Aes
            .set_key_rounds(&mut db.kdf_parameters, 64)
            .unwrap();
        let saved = save_kdbx(&db, b"<x/>", &credential()).unwrap();
        let wrong = MasterCredential::from_password("nope");
        assert!(matches!(
            load_kdbx(&mut Cursor::new(&saved.bytes), &wrong),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn flipped_bit_in_body_hmac_is_an_integrity_error() {
        // AES cipher with Argon2id parameters, then a single bit flip
        // in the trailing HMAC block stream.
        let db = fast_argon2_database();
        let saved = save_kdbx(&db, b"<KeePassFile/>", &credential()).unwrap();

        let mut tampered = saved.bytes.clone();
        // The file ends with the terminator block: 32 HMAC bytes then a
        // zero length word. Flip a bit inside that HMAC.
        let idx = tampered.len() - 10;
        tampered[idx] ^= 0x01;
        let result = load_kdbx(&mut Cursor::new(&tampered), &credential());
        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[test]
    fn flipped_bit_in_header_is_rejected() {
        let db = fast_argon2_database();
        let saved = save_kdbx(&db, b"<x/>", &credential()).unwrap();
        let mut tampered = saved.bytes.clone();
        // Past the signatures and version, inside the field stream.
        tampered[20] ^= 0x01;
        assert!(load_kdbx(&mut Cursor::new(&tampered), &credential()).is_err());
    }
}
