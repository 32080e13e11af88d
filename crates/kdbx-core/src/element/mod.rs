//! Database elements: groups, entries, their timestamps and custom data.

pub mod custom_data;
pub mod deleted_object;
pub mod entry;
pub mod group;
pub mod times;

pub use custom_data::{CustomData, CustomDataItem};
pub use deleted_object::DeletedObject;
pub use entry::{EntryField, EntryKdbx};
pub use group::GroupKdbx;
pub use times::NodeTimes;
