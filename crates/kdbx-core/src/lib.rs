//! kdbx-core - KeePass database format and crypto engine
//!
//! This crate implements the KDB/KDBX wire formats (headers, key
//! derivation, ciphers, integrity framing), the binary attachment
//! pools, and the in-memory entity tree. The XML document layer and any
//! UI concerns live outside this crate.

pub mod binary;
pub mod credential;
pub mod crypto;
pub mod database;
pub mod element;
pub mod error;
pub mod format;
pub mod kdb;
pub mod variant_dictionary;

pub use binary::{AttachmentPool, BinaryCache, BinaryData, BinaryPool, CustomIconPool};
pub use credential::MasterCredential;
pub use crypto::cipher::CipherEngine;
pub use crypto::kdf::{Argon2Variant, KdfEngine, KdfParameters};
pub use database::{CompressionAlgorithm, DatabaseKdbx, TimedSetting};
pub use element::{CustomData, CustomDataItem, DeletedObject, EntryKdbx, GroupKdbx, NodeTimes};
pub use error::{Error, Result};
pub use format::{load_kdbx, save_kdbx, LoadedKdbx, SavedKdbx};
pub use kdb::{DatabaseKdb, EntryKdb, GroupKdb};
pub use variant_dictionary::{VariantDictionary, VariantValue};

// Re-export types that appear throughout the public API
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
