//! Error types for kdbx-core

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for kdbx-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading, writing or reconciling a database.
///
/// The variants split into the taxonomy callers need to present distinct
/// guidance: [`Error::Integrity`] means "wrong password or corrupted key
/// material", everything format-shaped means "unsupported or corrupt file".
#[derive(Error, Debug)]
pub enum Error {
    /// The file does not start with a known KDB/KDBX signature pair
    #[error("not a KeePass database: unrecognized file signature")]
    InvalidSignature,

    /// The file declares a critical format version newer than we support
    #[error("unsupported database version {0:#010x}")]
    UnsupportedVersion(u32),

    /// A structural problem in the byte stream (truncated field, bad
    /// length prefix, unknown critical header field, ...)
    #[error("malformed database: {0}")]
    Format(String),

    /// The header CipherID does not match any known cipher engine
    #[error("unknown cipher {0}")]
    UnknownCipher(Uuid),

    /// The KDF parameters carry an unknown engine UUID
    #[error("unknown key derivation function {0}")]
    UnknownKdf(Uuid),

    /// A KDF parameter was set outside its engine-specific bounds
    #[error("key derivation parameter out of bounds: {0}")]
    KdfParameter(String),

    /// An HMAC or hash check failed. Never downgraded to a warning:
    /// either the credentials are wrong or the file was tampered with.
    #[error("integrity check failed ({0}): invalid credentials or corrupted database")]
    Integrity(&'static str),

    /// A cipher primitive rejected its inputs (key/IV length, padding)
    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    /// One of the two trees handed to the merger has no root group
    #[error("database is not open: missing root group")]
    RootGroupMissing,

    /// IO error, scoped to the operation that produced it
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that should be reported as a credential problem
    /// rather than a corrupt or unsupported file.
    pub fn is_credential_error(&self) -> bool {
        matches!(self, Error::Integrity(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_errors_map_to_credential_guidance() {
        assert!(Error::Integrity("header HMAC").is_credential_error());
        assert!(!Error::Format("truncated".into()).is_credential_error());
        assert!(!Error::InvalidSignature.is_credential_error());
    }
}
