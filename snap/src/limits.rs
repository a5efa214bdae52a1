//! Wire-level bounds shared by producers and consumers.
//!
//! Peers must agree on these bit-exactly; changing any of them is a protocol
//! break.

/// Highest internal item type id.
pub const MAX_TYPE: i32 = 0x7FFF;

/// Highest item id.
pub const MAX_ID: i32 = 0xFFFF;

/// Per-snapshot item cap.
pub const MAX_ITEMS: usize = 1024;

/// Per-snapshot byte cap for the data region.
pub const MAX_SNAPSHOT_SIZE: usize = 64 * 1024;

/// Bound of the static-size registry, indexed by internal type.
pub const MAX_NETOBJ_SIZES: usize = 64;

/// Capacity of a builder's extended-type table.
pub const MAX_EXTENDED_ITEM_TYPES: usize = 64;

/// Lowest id used by extended-type indirection items (internal type 0).
pub const OFFSET_UUID_TYPE: i32 = MAX_TYPE - MAX_EXTENDED_ITEM_TYPES as i32 + 1;

/// Size of an item's header word.
pub const ITEM_HEADER_BYTES: usize = 4;

/// Size of a snapshot blob header (`data_size`, `num_items`).
pub const SNAPSHOT_HEADER_BYTES: usize = 8;

/// Size of a delta header (`num_deleted`, `num_updates`, `num_temp`).
pub const DELTA_HEADER_BYTES: usize = 12;
