//! Binary content pools for entry attachments and custom icons.
//!
//! Content is owned by a pool and referenced from entries/icons by key.
//! Bytes live either fully in RAM (small content) or in a temp file that
//! is encrypted at rest with a session cipher, so plaintext attachment
//! bytes never reach persistent storage outside the unlocked session.

pub mod cache;
pub mod data;
pub mod pool;

pub use cache::{BinaryCache, LruCache};
pub use data::BinaryData;
pub use pool::{AttachmentPool, BinaryPool, CustomIconPool, IconImageCustom, KeyBinary};
