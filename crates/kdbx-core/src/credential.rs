//! Master credential handling: password and key file composition.

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// The secrets used to unlock a database. Both components are optional
/// but at least one must be present; all material is zeroed on drop.
#[derive(Default, Zeroize, ZeroizeOnDrop)]
pub struct MasterCredential {
    password: Option<String>,
    key_file: Option<Vec<u8>>,
}

impl MasterCredential {
    pub fn from_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            key_file: None,
        }
    }

    pub fn from_key_file(key_file: Vec<u8>) -> Self {
        Self {
            password: None,
            key_file: Some(key_file),
        }
    }

    pub fn from_password_and_key_file(password: impl Into<String>, key_file: Vec<u8>) -> Self {
        Self {
            password: Some(password.into()),
            key_file: Some(key_file),
        }
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn has_key_file(&self) -> bool {
        self.key_file.is_some()
    }

    /// The 32-byte composite key fed into the KDF: SHA-256 over the
    /// concatenated digests of each present component.
    pub fn composite_key(&self) -> Result<[u8; 32]> {
        if self.password.is_none() && self.key_file.is_none() {
            return Err(Error::Crypto("no credential provided".into()));
        }
        let mut hasher = Sha256::new();
        if let Some(password) = &self.password {
            hasher.update(Sha256::digest(password.as_bytes()));
        }
        if let Some(key_file) = &self.key_file {
            hasher.update(key_file_key(key_file));
        }
        Ok(hasher.finalize().into())
    }
}

impl std::fmt::Debug for MasterCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterCredential")
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_file", &self.key_file.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Key material from a key file: a 32-byte file is used verbatim,
/// anything else is hashed down to 32 bytes.
fn key_file_key(data: &[u8]) -> [u8; 32] {
    if data.len() == 32 {
        let mut key = [0u8; 32];
        key.copy_from_slice(data);
        key
    } else {
        Sha256::digest(data).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_is_deterministic() {
        let a = MasterCredential::from_password("correct horse");
        let b = MasterCredential::from_password("correct horse");
        assert_eq!(a.composite_key().unwrap(), b.composite_key().unwrap());
    }

    #[test]
    fn components_change_the_key() {
        let password_only = MasterCredential::from_password("pw");
        let with_file = MasterCredential::from_password_and_key_file("pw", vec![1u8; 32]);
        let file_only = MasterCredential::from_key_file(vec![1u8; 32]);
        let keys = [
            password_only.composite_key().unwrap(),
            with_file.composite_key().unwrap(),
            file_only.composite_key().unwrap(),
        ];
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[1], keys[2]);
        assert_ne!(keys[0], keys[2]);
    }

    #[test]
    fn raw_32_byte_key_file_is_used_verbatim() {
        let raw = MasterCredential::from_key_file(vec![7u8; 32]);
        let expected: [u8; 32] = {
            let mut hasher = Sha256::new();
            hasher.update([7u8; 32]);
            hasher.finalize().into()
        };
        assert_eq!(raw.composite_key().unwrap(), expected);

        // Any other length is hashed before composition.
        let hashed = MasterCredential::from_key_file(vec![7u8; 33]);
        assert_ne!(hashed.composite_key().unwrap(), expected);
    }

    #[test]
    fn empty_credential_is_rejected() {
        let none = MasterCredential::default();
        assert!(matches!(none.composite_key(), Err(Error::Crypto(_))));
    }

    #[test]
    fn debug_masks_secrets() {
        let cred = MasterCredential::from_password("hunter2");
        assert!(!format!("{cred:?}").contains("hunter2"));
    }
}
