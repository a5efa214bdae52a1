//! Incremental snapshot assembly.

use uuid::Uuid;
use uuidreg::{uuid_to_words, UuidRegistry, OFFSET_UUID};

use crate::compat::obj_six_to_seven;
use crate::limits::{MAX_EXTENDED_ITEM_TYPES, MAX_ID, MAX_ITEMS, MAX_SNAPSHOT_SIZE, MAX_TYPE};
use crate::snapshot::Snapshot;
use crate::types::ItemKey;

#[derive(Debug, Clone)]
struct ExtendedType {
    external_type: i32,
    uuid: Uuid,
}

/// Single-writer accumulator that assembles the next snapshot.
///
/// A builder is reset with [`init`](Self::init) and reused across ticks. The
/// extended-type table survives the reset so type handles stay stable within
/// a session; `init` re-emits one indirection item per known extended type,
/// keeping every snapshot self-describing even when no instance of the type
/// is added that tick.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    offsets: Vec<i32>,
    data: Vec<i32>,
    sixup: bool,
    extended: Vec<ExtendedType>,
    // Sink for items the sixup remap drops; writes land here and go nowhere.
    scratch: Vec<i32>,
}

impl SnapshotBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the builder for a new tick.
    ///
    /// `sixup` enables the protocol-seven object-type remapping for plain
    /// types added afterwards.
    pub fn init(&mut self, sixup: bool) {
        self.offsets.clear();
        self.data.clear();
        self.sixup = sixup;
        for index in 0..self.extended.len() {
            self.emit_indirection(index);
        }
    }

    /// Number of items added so far.
    #[must_use]
    pub fn num_items(&self) -> usize {
        self.offsets.len()
    }

    /// Bytes of item data accumulated so far.
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.data.len() * 4
    }

    /// Allocates a zeroed item and returns its writable payload.
    ///
    /// `type_id` is an external type: plain types below `OFFSET_UUID` go in
    /// as-is, UUID-qualified types are translated to a short handle and, on
    /// first sight, announced through an indirection item emitted before the
    /// caller's item.
    ///
    /// Returns `None` when `id` is -1 (reserved), when a negative type is
    /// passed outside sixup mode, or when the item would push the snapshot
    /// past its size or item caps; overflow indicates a bug in the game
    /// loop.
    ///
    /// In sixup mode a plain type whose remapping comes back negative is
    /// accepted but not emitted: the returned slice is a scratch sink and
    /// the item will not be present in the finished snapshot.
    ///
    /// # Panics
    ///
    /// Panics when `size_bytes` is not word-aligned or the extended-type
    /// table is exhausted; both are programmer errors.
    pub fn new_item(
        &mut self,
        registry: &UuidRegistry,
        type_id: i32,
        id: i32,
        size_bytes: usize,
    ) -> Option<&mut [i32]> {
        if id == -1 {
            return None;
        }
        debug_assert!((0..=MAX_ID).contains(&id), "item id {id} out of range");
        assert!(size_bytes % 4 == 0, "item size must be word aligned");

        let mut internal = type_id;
        let mut extended = false;
        if type_id >= OFFSET_UUID {
            extended = true;
            internal = MAX_TYPE - self.extended_index(registry, type_id) as i32;
        }

        if self.sixup && !extended {
            internal = if internal >= 0 {
                obj_six_to_seven(internal)
            } else {
                -internal
            };
            if internal < 0 {
                self.scratch.clear();
                self.scratch.resize(size_bytes / 4, 0);
                return Some(&mut self.scratch[..]);
            }
        } else if internal < 0 {
            return None;
        }

        self.append_item(internal, id, size_bytes)
    }

    /// Returns the writable payload of the item with `key`, if present.
    #[must_use]
    pub fn get_item_data(&mut self, key: ItemKey) -> Option<&mut [i32]> {
        let index = self.item_index(key)?;
        Some(self.item_data_mut(index))
    }

    /// Flattens the accumulated items into an immutable snapshot.
    #[must_use]
    pub fn finish(&self) -> Snapshot {
        Snapshot::from_parts(self.offsets.clone(), self.data.clone())
    }

    /// Appends an item by already-internal type, skipping translation.
    ///
    /// The capacity check happens here, at the point of actual append, so an
    /// indirection item emitted on the way cannot push the caller's item
    /// past the caps unnoticed.
    pub(crate) fn append_item(
        &mut self,
        internal_type: i32,
        id: i32,
        size_bytes: usize,
    ) -> Option<&mut [i32]> {
        let words = size_bytes / 4;
        let new_size = (self.data.len() + 1 + words) * 4;
        if new_size > MAX_SNAPSHOT_SIZE || self.offsets.len() + 1 > MAX_ITEMS {
            return None;
        }
        self.offsets.push((self.data.len() * 4) as i32);
        self.data.push(ItemKey::new(internal_type, id).raw());
        let start = self.data.len();
        self.data.resize(start + words, 0);
        Some(&mut self.data[start..])
    }

    pub(crate) fn item_index(&self, key: ItemKey) -> Option<usize> {
        (0..self.offsets.len()).find(|&index| {
            self.data[self.offsets[index] as usize / 4] == key.raw()
        })
    }

    pub(crate) fn item_len_words(&self, index: usize) -> usize {
        self.item_end_word(index) - self.offsets[index] as usize / 4 - 1
    }

    pub(crate) fn item_data_mut(&mut self, index: usize) -> &mut [i32] {
        let start = self.offsets[index] as usize / 4 + 1;
        let end = self.item_end_word(index);
        &mut self.data[start..end]
    }

    fn item_end_word(&self, index: usize) -> usize {
        if index + 1 < self.offsets.len() {
            self.offsets[index + 1] as usize / 4
        } else {
            self.data.len()
        }
    }

    fn extended_index(&mut self, registry: &UuidRegistry, external_type: i32) -> usize {
        if let Some(index) = self
            .extended
            .iter()
            .position(|entry| entry.external_type == external_type)
        {
            return index;
        }
        assert!(
            self.extended.len() < MAX_EXTENDED_ITEM_TYPES,
            "extended item type table exhausted"
        );
        let index = self.extended.len();
        self.extended.push(ExtendedType {
            external_type,
            uuid: registry.uuid(external_type),
        });
        self.emit_indirection(index);
        index
    }

    // Announce items bypass the sixup remap; the table is identical in both
    // protocols.
    fn emit_indirection(&mut self, index: usize) {
        let words = uuid_to_words(&self.extended[index].uuid);
        if let Some(slot) = self.append_item(0, MAX_TYPE - index as i32, 16) {
            slot.copy_from_slice(&words);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::OFFSET_UUID_TYPE;

    #[test]
    fn builds_items_in_call_order() {
        let registry = UuidRegistry::new();
        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        builder.new_item(&registry, 5, 7, 12).unwrap()[..3].copy_from_slice(&[1, 2, 3]);
        builder.new_item(&registry, 6, 8, 4).unwrap()[0] = 9;
        let snapshot = builder.finish();
        assert_eq!(snapshot.num_items(), 2);
        assert_eq!(snapshot.item(0).key(), ItemKey::new(5, 7));
        assert_eq!(snapshot.item(1).key(), ItemKey::new(6, 8));
    }

    #[test]
    fn payload_starts_zeroed() {
        let registry = UuidRegistry::new();
        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        let slot = builder.new_item(&registry, 1, 1, 12).unwrap();
        assert_eq!(slot, &[0, 0, 0]);
    }

    #[test]
    fn refuses_reserved_id() {
        let registry = UuidRegistry::new();
        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        assert!(builder.new_item(&registry, 5, -1, 4).is_none());
        assert_eq!(builder.num_items(), 0);
    }

    #[test]
    fn refuses_negative_type_outside_sixup() {
        let registry = UuidRegistry::new();
        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        assert!(builder.new_item(&registry, -3, 1, 4).is_none());
    }

    #[test]
    fn refuses_oversized_item() {
        let registry = UuidRegistry::new();
        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        assert!(builder
            .new_item(&registry, 1, 1, MAX_SNAPSHOT_SIZE)
            .is_none());
        assert_eq!(builder.num_items(), 0);
        // Exactly at the cap (header word included) is admitted.
        assert!(builder
            .new_item(&registry, 1, 1, MAX_SNAPSHOT_SIZE - 4)
            .is_some());
    }

    #[test]
    fn refuses_item_count_overflow() {
        let registry = UuidRegistry::new();
        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        for id in 0..MAX_ITEMS {
            assert!(builder.new_item(&registry, 1, id as i32, 0).is_some());
        }
        assert!(builder.new_item(&registry, 2, 0, 0).is_none());
        assert_eq!(builder.num_items(), MAX_ITEMS);
    }

    #[test]
    fn get_item_data_finds_existing_items() {
        let registry = UuidRegistry::new();
        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        builder.new_item(&registry, 5, 7, 8).unwrap().copy_from_slice(&[1, 2]);
        let slot = builder.get_item_data(ItemKey::new(5, 7)).unwrap();
        assert_eq!(slot, &[1, 2]);
        slot[1] = 5;
        assert_eq!(builder.finish().item(0).data(), &[1, 5]);
        assert!(builder.get_item_data(ItemKey::new(5, 8)).is_none());
    }

    #[test]
    fn init_resets_items_but_keeps_extended_types() {
        let mut registry = UuidRegistry::new();
        let external = registry.register("obj.custom");

        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        builder.new_item(&registry, external, 3, 4).unwrap();
        let first = builder.finish();
        assert_eq!(first.num_items(), 2);

        // The announce item reappears on its own after a reset.
        builder.init(false);
        let second = builder.finish();
        assert_eq!(second.num_items(), 1);
        let announce = second.item(0);
        assert_eq!(announce.type_id(), 0);
        assert_eq!(announce.id(), MAX_TYPE);
        assert_eq!(
            announce.data(),
            &uuid_to_words(&registry.uuid(external))[..]
        );
    }

    #[test]
    fn extended_types_get_stable_descending_handles() {
        let mut registry = UuidRegistry::new();
        let first = registry.register("obj.first");
        let second = registry.register("obj.second");

        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        builder.new_item(&registry, first, 1, 4).unwrap();
        builder.new_item(&registry, second, 1, 4).unwrap();
        builder.new_item(&registry, first, 2, 4).unwrap();
        let snapshot = builder.finish();

        // Two announce items, three object items; handles count down from
        // MAX_TYPE and stay above OFFSET_UUID_TYPE.
        assert_eq!(snapshot.num_items(), 5);
        assert_eq!(snapshot.item(1).type_id(), MAX_TYPE);
        assert_eq!(snapshot.item(3).type_id(), MAX_TYPE - 1);
        assert_eq!(snapshot.item(4).type_id(), MAX_TYPE);
        assert!(snapshot.item(3).type_id() >= OFFSET_UUID_TYPE);
    }

    #[test]
    fn announce_item_precedes_first_instance() {
        let mut registry = UuidRegistry::new();
        let external = registry.register("obj.custom");

        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        builder.new_item(&registry, 5, 1, 4).unwrap();
        builder.new_item(&registry, external, 9, 4).unwrap();
        let snapshot = builder.finish();

        assert_eq!(snapshot.item(0).key(), ItemKey::new(5, 1));
        assert_eq!(snapshot.item(1).key(), ItemKey::new(0, MAX_TYPE));
        assert_eq!(snapshot.item(2).key(), ItemKey::new(MAX_TYPE, 9));
    }

    #[test]
    fn sixup_remaps_plain_types() {
        let registry = UuidRegistry::new();
        let mut builder = SnapshotBuilder::new();
        builder.init(true);
        builder.new_item(&registry, 8, 1, 4).unwrap();
        let snapshot = builder.finish();
        assert_eq!(snapshot.item(0).type_id(), 6);
    }

    #[test]
    fn sixup_discards_withdrawn_types_but_accepts_writes() {
        let registry = UuidRegistry::new();
        let mut builder = SnapshotBuilder::new();
        builder.init(true);
        let slot = builder.new_item(&registry, 6, 1, 8).unwrap();
        slot.copy_from_slice(&[1, 2]);
        assert_eq!(builder.num_items(), 0);
        assert_eq!(builder.finish().num_items(), 0);
    }

    #[test]
    fn sixup_negates_negative_types() {
        let registry = UuidRegistry::new();
        let mut builder = SnapshotBuilder::new();
        builder.init(true);
        builder.new_item(&registry, -9, 1, 4).unwrap();
        let snapshot = builder.finish();
        assert_eq!(snapshot.item(0).type_id(), 9);
    }

    #[test]
    #[should_panic(expected = "word aligned")]
    fn unaligned_size_panics() {
        let registry = UuidRegistry::new();
        let mut builder = SnapshotBuilder::new();
        builder.init(false);
        let _ = builder.new_item(&registry, 1, 1, 3);
    }
}
