//! Immutable per-tick snapshots.
//!
//! A snapshot is a self-describing container of typed items addressed by
//! [`ItemKey`]. The blob form is `{ data_size, num_items }`, an offset table
//! and a tightly packed data region where each item is one header word
//! followed by its payload words. Everything on the wire is little-endian
//! and 4-byte aligned.

use std::fmt;

use uuidreg::{uuid_to_words, words_to_uuid, UuidRegistry, OFFSET_UUID};

use crate::limits::{
    ITEM_HEADER_BYTES, MAX_ITEMS, MAX_SNAPSHOT_SIZE, OFFSET_UUID_TYPE, SNAPSHOT_HEADER_BYTES,
};
use crate::types::ItemKey;

/// Number of words in an indirection-item UUID payload.
const UUID_WORDS: usize = 4;

/// An immutable snapshot of world state at one tick.
///
/// Snapshots are produced by [`SnapshotBuilder::finish`] or decoded from a
/// validated blob via [`Snapshot::from_bytes`]; they never change afterwards.
///
/// [`SnapshotBuilder::finish`]: crate::SnapshotBuilder::finish
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Byte offsets of each item into the data region, in insertion order.
    offsets: Vec<i32>,
    /// Item header and payload words, tightly packed.
    data: Vec<i32>,
}

/// A borrowed view of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotItem<'a> {
    key: ItemKey,
    data: &'a [i32],
}

impl<'a> SnapshotItem<'a> {
    /// The item's key.
    #[must_use]
    pub fn key(&self) -> ItemKey {
        self.key
    }

    /// The internal type half of the key.
    #[must_use]
    pub fn type_id(&self) -> i32 {
        self.key.type_id()
    }

    /// The id half of the key.
    #[must_use]
    pub fn id(&self) -> i32 {
        self.key.id()
    }

    /// The payload words.
    #[must_use]
    pub fn data(&self) -> &'a [i32] {
        self.data
    }
}

/// Reasons a blob fails structural validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// The blob is smaller than the snapshot header.
    TooSmall { actual: usize },
    /// `num_items` is negative or above [`MAX_ITEMS`](crate::MAX_ITEMS).
    ItemCountOutOfRange { num_items: i32 },
    /// `data_size` is negative, misaligned, or above
    /// [`MAX_SNAPSHOT_SIZE`](crate::MAX_SNAPSHOT_SIZE).
    DataSizeOutOfRange { data_size: i32 },
    /// The blob length disagrees with the header's implied total size.
    TotalSizeMismatch { expected: usize, actual: usize },
    /// An offset points outside the data region.
    OffsetOutOfBounds { index: usize, offset: i32 },
    /// An offset is not 4-byte aligned.
    MisalignedOffset { index: usize, offset: i32 },
    /// The offsets imply a negative payload size for an item.
    NegativeItemSize { index: usize },
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall { actual } => {
                write!(f, "blob too small for snapshot header: {actual} bytes")
            }
            Self::ItemCountOutOfRange { num_items } => {
                write!(f, "item count {num_items} out of range")
            }
            Self::DataSizeOutOfRange { data_size } => {
                write!(f, "data size {data_size} out of range")
            }
            Self::TotalSizeMismatch { expected, actual } => {
                write!(f, "blob is {actual} bytes but header implies {expected}")
            }
            Self::OffsetOutOfBounds { index, offset } => {
                write!(f, "offset {offset} of item {index} out of bounds")
            }
            Self::MisalignedOffset { index, offset } => {
                write!(f, "offset {offset} of item {index} not word aligned")
            }
            Self::NegativeItemSize { index } => {
                write!(f, "item {index} has a negative implied size")
            }
        }
    }
}

impl std::error::Error for ReadError {}

impl Snapshot {
    /// The empty snapshot, used as the baseline when no predecessor exists.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(offsets: Vec<i32>, data: Vec<i32>) -> Self {
        Self { offsets, data }
    }

    /// Number of items.
    #[must_use]
    pub fn num_items(&self) -> usize {
        self.offsets.len()
    }

    /// Size of the data region in bytes.
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.data.len() * 4
    }

    /// Size of the full blob: header, offset table and data region.
    #[must_use]
    pub fn total_size(&self) -> usize {
        SNAPSHOT_HEADER_BYTES + self.offsets.len() * 4 + self.data_size()
    }

    /// Returns a view of item `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn item(&self, index: usize) -> SnapshotItem<'_> {
        let start = self.offsets[index] as usize / 4;
        let end = self.item_end_word(index);
        SnapshotItem {
            key: ItemKey::from_raw(self.data[start]),
            data: &self.data[start + 1..end],
        }
    }

    /// Payload size of item `index` in bytes, implied by the offset table.
    #[must_use]
    pub fn item_size(&self, index: usize) -> usize {
        (self.item_end_word(index) - self.offsets[index] as usize / 4 - 1) * 4
    }

    /// Key of item `index`.
    #[must_use]
    pub fn item_key(&self, index: usize) -> ItemKey {
        ItemKey::from_raw(self.data[self.offsets[index] as usize / 4])
    }

    /// External type of item `index`.
    ///
    /// Internal types at or above [`OFFSET_UUID_TYPE`](crate::OFFSET_UUID_TYPE)
    /// are short handles for UUID-typed objects; the companion indirection
    /// item in this snapshot names the UUID, and `registry` maps it back to
    /// the external id. Returns the raw internal type when the indirection
    /// item is missing, too short, or names an unknown UUID.
    #[must_use]
    pub fn item_type(&self, index: usize, registry: &UuidRegistry) -> i32 {
        let internal = self.item(index).type_id();
        if internal < OFFSET_UUID_TYPE {
            return internal;
        }
        let Some(type_index) = self.item_index(ItemKey::new(0, internal)) else {
            return internal;
        };
        let payload = self.item(type_index).data();
        if payload.len() < UUID_WORDS {
            return internal;
        }
        registry
            .lookup_uuid(&words_to_uuid(&payload[..UUID_WORDS]))
            .unwrap_or(internal)
    }

    /// Index of the item with `key`, if present.
    #[must_use]
    pub fn item_index(&self, key: ItemKey) -> Option<usize> {
        (0..self.num_items()).find(|&index| self.item_key(index) == key)
    }

    /// Finds an item's payload by external type and id.
    ///
    /// Plain external types compose the key directly. UUID-qualified types
    /// are resolved through this snapshot's indirection items; the lookup
    /// fails if the snapshot does not announce the type.
    #[must_use]
    pub fn find_item(&self, external_type: i32, id: i32, registry: &UuidRegistry) -> Option<&[i32]> {
        let internal = if external_type >= OFFSET_UUID {
            let words = uuid_to_words(&registry.uuid(external_type));
            self.items().find_map(|item| {
                let announces = item.type_id() == 0
                    && item.id() >= OFFSET_UUID_TYPE
                    && item.data().get(..UUID_WORDS) == Some(&words[..]);
                announces.then(|| item.id())
            })?
        } else {
            external_type
        };
        let index = self.item_index(ItemKey::new(internal, id))?;
        Some(self.item(index).data())
    }

    /// Iterates over all items in insertion order.
    pub fn items(&self) -> impl Iterator<Item = SnapshotItem<'_>> {
        (0..self.num_items()).map(|index| self.item(index))
    }

    /// Wrapping sum of every payload word.
    ///
    /// Item order does not affect the result; this is a mismatch detector,
    /// not a cryptographic checksum.
    #[must_use]
    pub fn crc(&self) -> u32 {
        let mut crc = 0u32;
        for item in self.items() {
            for &word in item.data() {
                crc = crc.wrapping_add(word as u32);
            }
        }
        crc
    }

    /// Serializes the snapshot into its blob form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_size());
        out.extend_from_slice(&(self.data_size() as i32).to_le_bytes());
        out.extend_from_slice(&(self.num_items() as i32).to_le_bytes());
        for offset in &self.offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        for word in &self.data {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Decodes and validates a blob.
    ///
    /// Succeeds iff the header fields, offsets and implied item sizes all
    /// satisfy the structural invariants and the blob length matches the
    /// implied total size.
    ///
    /// # Errors
    ///
    /// Returns the first violated bound as a [`ReadError`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReadError> {
        if bytes.len() < SNAPSHOT_HEADER_BYTES {
            return Err(ReadError::TooSmall {
                actual: bytes.len(),
            });
        }
        let data_size = read_word(bytes, 0);
        let num_items = read_word(bytes, 4);
        if num_items < 0 || num_items as usize > MAX_ITEMS {
            return Err(ReadError::ItemCountOutOfRange { num_items });
        }
        if data_size < 0 || data_size % 4 != 0 || data_size as usize > MAX_SNAPSHOT_SIZE {
            return Err(ReadError::DataSizeOutOfRange { data_size });
        }

        let num_items = num_items as usize;
        let expected = SNAPSHOT_HEADER_BYTES + num_items * 4 + data_size as usize;
        if bytes.len() != expected {
            return Err(ReadError::TotalSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        let mut offsets = Vec::with_capacity(num_items);
        for index in 0..num_items {
            let offset = read_word(bytes, SNAPSHOT_HEADER_BYTES + index * 4);
            if offset < 0 || offset > data_size {
                return Err(ReadError::OffsetOutOfBounds { index, offset });
            }
            if offset % 4 != 0 {
                return Err(ReadError::MisalignedOffset { index, offset });
            }
            offsets.push(offset);
        }
        for index in 0..num_items {
            let end = if index + 1 < num_items {
                offsets[index + 1]
            } else {
                data_size
            };
            if end - offsets[index] < ITEM_HEADER_BYTES as i32 {
                return Err(ReadError::NegativeItemSize { index });
            }
        }

        let data_start = SNAPSHOT_HEADER_BYTES + num_items * 4;
        let data = bytes[data_start..]
            .chunks_exact(4)
            .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self { offsets, data })
    }

    /// Logs the header and every item through `tracing` at debug level.
    pub fn debug_dump(&self) {
        tracing::debug!(
            data_size = self.data_size(),
            num_items = self.num_items(),
            "snapshot"
        );
        for item in self.items() {
            tracing::debug!(
                type_id = item.type_id(),
                id = item.id(),
                payload = ?item.data(),
                "snapshot item"
            );
        }
    }

    fn item_end_word(&self, index: usize) -> usize {
        if index + 1 < self.offsets.len() {
            self.offsets[index + 1] as usize / 4
        } else {
            self.data.len()
        }
    }
}

fn read_word(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SnapshotBuilder;
    use crate::limits::MAX_TYPE;

    fn build(items: &[(i32, i32, &[i32])]) -> Snapshot {
        let registry = UuidRegistry::new();
        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        for (type_id, id, payload) in items {
            let slot = builder
                .new_item(&registry, *type_id, *id, payload.len() * 4)
                .expect("item fits");
            slot.copy_from_slice(payload);
        }
        builder.finish()
    }

    #[test]
    fn empty_snapshot() {
        let snapshot = Snapshot::empty();
        assert_eq!(snapshot.num_items(), 0);
        assert_eq!(snapshot.data_size(), 0);
        assert_eq!(snapshot.total_size(), SNAPSHOT_HEADER_BYTES);
        assert_eq!(snapshot.crc(), 0);
    }

    #[test]
    fn item_access() {
        let snapshot = build(&[(5, 7, &[1, 2, 3]), (6, 8, &[9])]);
        assert_eq!(snapshot.num_items(), 2);
        assert_eq!(snapshot.item_size(0), 12);
        assert_eq!(snapshot.item_size(1), 4);
        let first = snapshot.item(0);
        assert_eq!(first.type_id(), 5);
        assert_eq!(first.id(), 7);
        assert_eq!(first.data(), &[1, 2, 3]);
        assert_eq!(snapshot.item(1).data(), &[9]);
    }

    #[test]
    fn item_index_by_key() {
        let snapshot = build(&[(5, 7, &[1, 2, 3]), (6, 8, &[9])]);
        assert_eq!(snapshot.item_index(ItemKey::new(6, 8)), Some(1));
        assert_eq!(snapshot.item_index(ItemKey::new(6, 9)), None);
    }

    #[test]
    fn find_item_plain_type() {
        let snapshot = build(&[(5, 7, &[1, 2, 3])]);
        let registry = UuidRegistry::new();
        assert_eq!(snapshot.find_item(5, 7, &registry), Some(&[1, 2, 3][..]));
        assert_eq!(snapshot.find_item(5, 8, &registry), None);
    }

    #[test]
    fn crc_is_order_invariant() {
        let forward = build(&[(5, 7, &[1, 2, 3]), (6, 8, &[9])]);
        let reversed = build(&[(6, 8, &[9]), (5, 7, &[1, 2, 3])]);
        assert_eq!(forward.crc(), reversed.crc());
    }

    #[test]
    fn crc_wraps() {
        let snapshot = build(&[(5, 7, &[i32::MIN, i32::MIN, 1])]);
        assert_eq!(
            snapshot.crc(),
            (i32::MIN as u32)
                .wrapping_add(i32::MIN as u32)
                .wrapping_add(1)
        );
    }

    #[test]
    fn blob_roundtrip() {
        let snapshot = build(&[(5, 7, &[1, 2, 3]), (6, 8, &[9])]);
        let bytes = snapshot.to_bytes();
        assert_eq!(bytes.len(), snapshot.total_size());
        let decoded = Snapshot::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn golden_blob_bytes() {
        let snapshot = build(&[(5, 7, &[1, 2])]);
        let words: Vec<i32> = vec![
            12,             // data_size
            1,              // num_items
            0,              // offset of item 0
            (5 << 16) | 7,  // header word
            1,
            2,
        ];
        let expected: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(snapshot.to_bytes(), expected);
    }

    #[test]
    fn from_bytes_rejects_truncated_header() {
        assert_eq!(
            Snapshot::from_bytes(&[0; 4]),
            Err(ReadError::TooSmall { actual: 4 })
        );
    }

    #[test]
    fn from_bytes_rejects_bad_counts() {
        let mut bytes = Snapshot::empty().to_bytes();
        bytes[4..8].copy_from_slice(&(-1i32).to_le_bytes());
        assert_eq!(
            Snapshot::from_bytes(&bytes),
            Err(ReadError::ItemCountOutOfRange { num_items: -1 })
        );

        let mut bytes = Snapshot::empty().to_bytes();
        bytes[0..4].copy_from_slice(&(-4i32).to_le_bytes());
        assert_eq!(
            Snapshot::from_bytes(&bytes),
            Err(ReadError::DataSizeOutOfRange { data_size: -4 })
        );
    }

    #[test]
    fn from_bytes_rejects_size_mismatch() {
        let mut bytes = build(&[(5, 7, &[1])]).to_bytes();
        bytes.push(0);
        assert!(matches!(
            Snapshot::from_bytes(&bytes),
            Err(ReadError::TotalSizeMismatch { .. })
        ));
    }

    #[test]
    fn from_bytes_rejects_bad_offsets() {
        let snapshot = build(&[(5, 7, &[1])]);
        let mut bytes = snapshot.to_bytes();
        // Offset of item 0 lives at byte 8; point it past the data region.
        bytes[8..12].copy_from_slice(&100i32.to_le_bytes());
        assert!(matches!(
            Snapshot::from_bytes(&bytes),
            Err(ReadError::OffsetOutOfBounds { .. })
        ));

        let mut bytes = snapshot.to_bytes();
        bytes[8..12].copy_from_slice(&2i32.to_le_bytes());
        assert!(matches!(
            Snapshot::from_bytes(&bytes),
            Err(ReadError::MisalignedOffset { .. })
        ));
    }

    #[test]
    fn from_bytes_rejects_negative_item_size() {
        let snapshot = build(&[(5, 7, &[1])]);
        let mut bytes = snapshot.to_bytes();
        // Push the offset to the end of the data region; no room for the
        // header word.
        bytes[8..12].copy_from_slice(&8i32.to_le_bytes());
        assert!(matches!(
            Snapshot::from_bytes(&bytes),
            Err(ReadError::NegativeItemSize { .. })
        ));
    }

    #[test]
    fn builder_output_always_validates() {
        for items in [
            vec![],
            vec![(5, 7, vec![1, 2, 3])],
            vec![(5, 7, vec![1, 2, 3]), (6, 8, vec![9]), (7, 0, vec![])],
        ] {
            let borrowed: Vec<(i32, i32, &[i32])> = items
                .iter()
                .map(|(t, i, p)| (*t, *i, p.as_slice()))
                .collect();
            let snapshot = build(&borrowed);
            let bytes = snapshot.to_bytes();
            assert!(Snapshot::from_bytes(&bytes).is_ok());
        }
    }

    #[test]
    fn item_type_translates_extended_types() {
        let mut registry = UuidRegistry::new();
        let external = registry.register("obj.custom");

        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        let slot = builder
            .new_item(&registry, external, 11, 4)
            .expect("item fits");
        slot[0] = 42;
        let snapshot = builder.finish();

        // Item 0 is the indirection item, item 1 the object.
        assert_eq!(snapshot.num_items(), 2);
        assert_eq!(snapshot.item_type(0, &registry), 0);
        assert_eq!(snapshot.item_type(1, &registry), external);
        assert_eq!(snapshot.item(1).type_id(), MAX_TYPE);
    }

    #[test]
    fn item_type_falls_back_without_indirection() {
        // An item with a handle type but no announce item keeps the handle.
        let registry = UuidRegistry::new();
        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        builder
            .new_item(&registry, MAX_TYPE, 3, 4)
            .expect("item fits");
        let snapshot = builder.finish();
        assert_eq!(snapshot.item_type(0, &registry), MAX_TYPE);
    }
}
