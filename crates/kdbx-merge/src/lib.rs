//! kdbx-merge - Three-way reconciliation of credential databases
//!
//! Merges a source database (modern or legacy format) into a
//! destination in place: the newer side wins per field or per node,
//! deletion tombstones are honored against concurrent edits, and
//! attachments are copied between pools by streaming. Merging the same
//! source twice leaves the destination unchanged.

mod merger;

pub use merger::{MergeStats, Merger};
