//! Tick snapshots, delta codec and bounded snapshot storage.
//!
//! The simulation assembles the world state of each tick into a
//! [`Snapshot`] through a [`SnapshotBuilder`], keeps recent ticks in a
//! [`SnapshotStorage`], and ships state as deltas produced and consumed by
//! [`SnapshotDelta`] against an acknowledged past snapshot.
//!
//! # Design principles
//!
//! - **Validated input** - every byte decoded from the wire is bounds-checked
//!   before use; malformed packets are rejected whole with a numbered error.
//! - **Bounded memory** - snapshots cap their item count and byte size;
//!   storage holds a short purgeable window of ticks.
//! - **Reversible deltas** - per-word wrapping diffs round-trip losslessly,
//!   so a client can rebuild any snapshot from a past one plus a delta.

mod builder;
mod compat;
mod delta;
mod hash;
mod limits;
mod snapshot;
mod storage;
mod types;

pub use builder::SnapshotBuilder;
pub use delta::{SnapshotDelta, UnpackError};
pub use limits::{
    DELTA_HEADER_BYTES, ITEM_HEADER_BYTES, MAX_EXTENDED_ITEM_TYPES, MAX_ID, MAX_ITEMS,
    MAX_NETOBJ_SIZES, MAX_SNAPSHOT_SIZE, MAX_TYPE, OFFSET_UUID_TYPE, SNAPSHOT_HEADER_BYTES,
};
pub use snapshot::{ReadError, Snapshot, SnapshotItem};
pub use storage::{SnapshotHolder, SnapshotStorage};
pub use types::ItemKey;
pub use uuidreg::OFFSET_UUID;
