//! Symmetric cipher engines selected by the header's CipherID UUID.

use aes::Aes256;
use chacha20::ChaCha20;
use cipher::block_padding::{NoPadding, Pkcs7, ZeroPadding};
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use twofish::Twofish;
use uuid::{uuid, Uuid};

use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type TwofishCbcEnc = cbc::Encryptor<Twofish>;
type TwofishCbcDec = cbc::Decryptor<Twofish>;

/// AES-256-CBC with PKCS7 padding.
pub const AES_UUID: Uuid = uuid!("31c1f2e6-bf71-4350-be58-05216afc5aff");
/// Twofish-CBC, zero-byte padding on encrypt, no padding on decrypt.
pub const TWOFISH_UUID: Uuid = uuid!("ad68f29f-576f-4bb9-a36a-d47af965346c");
/// ChaCha20 stream cipher, 12-byte nonce.
pub const CHACHA20_UUID: Uuid = uuid!("d6038a2b-8b6f-4cb5-a524-339a31dbb59a");

/// The symmetric cipher used for the database body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherEngine {
    #[default]
    Aes256,
    TwofishCbc,
    ChaCha20,
}

impl CipherEngine {
    /// Resolve an engine from a header CipherID. Unknown UUIDs are fatal.
    pub fn from_uuid(uuid: Uuid) -> Result<Self> {
        match uuid {
            AES_UUID => Ok(CipherEngine::Aes256),
            TWOFISH_UUID => Ok(CipherEngine::TwofishCbc),
            CHACHA20_UUID => Ok(CipherEngine::ChaCha20),
            other => Err(Error::UnknownCipher(other)),
        }
    }

    pub fn uuid(self) -> Uuid {
        match self {
            CipherEngine::Aes256 => AES_UUID,
            CipherEngine::TwofishCbc => TWOFISH_UUID,
            CipherEngine::ChaCha20 => CHACHA20_UUID,
        }
    }

    /// All engines take a 32-byte key.
    pub fn key_length(self) -> usize {
        32
    }

    pub fn iv_length(self) -> usize {
        match self {
            CipherEngine::Aes256 | CipherEngine::TwofishCbc => 16,
            CipherEngine::ChaCha20 => 12,
        }
    }

    pub fn encrypt(self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.check_lengths(key, iv)?;
        match self {
            CipherEngine::Aes256 => {
                let enc = Aes256CbcEnc::new_from_slices(key, iv)
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
            }
            CipherEngine::TwofishCbc => {
                // Zero padding on encrypt is the historical KeePass
                // behavior and must be kept for format compatibility.
                let enc = TwofishCbcEnc::new_from_slices(key, iv)
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                Ok(enc.encrypt_padded_vec_mut::<ZeroPadding>(plaintext))
            }
            CipherEngine::ChaCha20 => {
                let mut cipher = ChaCha20::new_from_slices(key, iv)
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                let mut data = plaintext.to_vec();
                cipher.apply_keystream(&mut data);
                Ok(data)
            }
        }
    }

    pub fn decrypt(self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check_lengths(key, iv)?;
        match self {
            CipherEngine::Aes256 => {
                let dec = Aes256CbcDec::new_from_slices(key, iv)
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                    .map_err(|_| Error::Integrity("block cipher padding"))
            }
            CipherEngine::TwofishCbc => {
                // Decrypt leaves the zero padding in place; the inner
                // block-stream framing carries the real lengths.
                let dec = TwofishCbcDec::new_from_slices(key, iv)
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                dec.decrypt_padded_vec_mut::<NoPadding>(ciphertext)
                    .map_err(|_| Error::Integrity("block cipher alignment"))
            }
            CipherEngine::ChaCha20 => self.encrypt(key, iv, ciphertext),
        }
    }

    fn check_lengths(self, key: &[u8], iv: &[u8]) -> Result<()> {
        if key.len() != self.key_length() {
            return Err(Error::Crypto(format!(
                "cipher key must be {} bytes, got {}",
                self.key_length(),
                key.len()
            )));
        }
        if iv.len() != self.iv_length() {
            return Err(Error::Crypto(format!(
                "cipher IV must be {} bytes, got {}",
                self.iv_length(),
                iv.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];
    const IV16: [u8; 16] = [3u8; 16];
    const IV12: [u8; 12] = [3u8; 12];

    #[test]
    fn unknown_cipher_uuid_is_fatal() {
        let bogus = Uuid::new_v4();
        assert!(matches!(
            CipherEngine::from_uuid(bogus),
            Err(Error::UnknownCipher(u)) if u == bogus
        ));
    }

    #[test]
    fn aes_roundtrip() {
        let plain = b"the quick brown fox jumps over the lazy dog";
        let engine = CipherEngine::Aes256;
        let ct = engine.encrypt(&KEY, &IV16, plain).unwrap();
        assert_ne!(&ct[..plain.len().min(ct.len())], &plain[..]);
        assert_eq!(engine.decrypt(&KEY, &IV16, &ct).unwrap(), plain);
    }

    #[test]
    fn chacha20_roundtrip() {
        let plain = b"stream cipher, arbitrary length, no padding";
        let engine = CipherEngine::ChaCha20;
        let ct = engine.encrypt(&KEY, &IV12, plain).unwrap();
        assert_eq!(ct.len(), plain.len());
        assert_eq!(engine.decrypt(&KEY, &IV12, &ct).unwrap(), plain);
    }

    #[test]
    fn twofish_pads_with_zero_bytes_and_keeps_them_on_decrypt() {
        let plain = b"seventeen bytes!!"; // 17 bytes, pads to 32
        let engine = CipherEngine::TwofishCbc;
        let ct = engine.encrypt(&KEY, &IV16, plain).unwrap();
        assert_eq!(ct.len(), 32);
        let round = engine.decrypt(&KEY, &IV16, &ct).unwrap();
        assert_eq!(round.len(), 32);
        assert_eq!(&round[..17], plain);
        assert!(round[17..].iter().all(|&b| b == 0));
    }

    #[test]
    fn iv_length_depends_on_engine() {
        assert_eq!(CipherEngine::Aes256.iv_length(), 16);
        assert_eq!(CipherEngine::TwofishCbc.iv_length(), 16);
        assert_eq!(CipherEngine::ChaCha20.iv_length(), 12);
        assert!(CipherEngine::Aes256.encrypt(&KEY, &IV12, b"x").is_err());
    }
}
