//! On-disk format layer: headers, load and save flows.

pub mod input;
pub mod kdb_header;
pub mod kdbx_header;
pub mod output;

pub use input::{load_kdbx, LoadedKdbx};
pub use kdb_header::DatabaseHeaderKdb;
pub use kdbx_header::DatabaseHeaderKdbx;
pub use output::{save_kdbx, SavedKdbx};

/// First signature word shared by every format generation.
pub const PM_DB_SIG1: u32 = 0x9AA2_D903;
/// Second signature word of a legacy KDB file.
pub const KDB_SIG2: u32 = 0xB54B_FB65;
/// Second signature word of a prerelease KDBX file.
pub const KDBX_SIG2_PRERELEASE: u32 = 0xB54B_FB66;
/// Second signature word of a released KDBX file.
pub const KDBX_SIG2: u32 = 0xB54B_FB67;

pub const FILE_VERSION_31: u32 = 0x0003_0001;
pub const FILE_VERSION_40: u32 = 0x0004_0000;
pub const FILE_VERSION_41: u32 = 0x0004_0001;

/// High half of the version word; a mismatch there is unsupported,
/// differences in the low half are tolerated.
pub const FILE_VERSION_CRITICAL_MASK: u32 = 0xFFFF_0000;

/// Whether a file of `version` can be read by a reader that supports up
/// to `supported`.
pub fn is_version_supported(version: u32, supported: u32) -> bool {
    (version & FILE_VERSION_CRITICAL_MASK) <= (supported & FILE_VERSION_CRITICAL_MASK)
}
