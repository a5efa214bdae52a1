//! Delta encoding between two snapshots.
//!
//! A delta carries the deleted keys and the changed or new items needed to
//! turn one snapshot into another. Payload words of matched items are
//! encoded as per-word wrapping differences, so the transport's variable
//! length integer packing collapses unchanged words to single bytes and the
//! decode side can reverse the transform losslessly.

use std::fmt;

use crate::builder::SnapshotBuilder;
use crate::hash::{find_index, KeyIndex};
use crate::limits::{DELTA_HEADER_BYTES, MAX_ID, MAX_ITEMS, MAX_NETOBJ_SIZES, MAX_TYPE};
use crate::snapshot::Snapshot;
use crate::types::ItemKey;

/// Errors surfaced while decoding an untrusted delta.
///
/// Callers drop the offending packet and keep serving; [`code`](Self::code)
/// exposes the wire-compatible numeric form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackError {
    /// The source ended inside the delta header.
    TruncatedHeader { available: usize },
    /// The deleted-keys section runs past the end of the source.
    TruncatedDeletedKeys { expected: usize, available: usize },
    /// An update record's type/id words are missing.
    TruncatedUpdateHeader { update: usize },
    /// An update record's inline size word is missing.
    TruncatedSizeField { update: usize },
    /// A header counter is negative.
    NegativeCounter { field: &'static str, value: i32 },
    /// An update type lies outside `[0, MAX_TYPE]`.
    TypeOutOfRange { type_id: i32 },
    /// An update id lies outside `[0, MAX_ID]`.
    IdOutOfRange { id: i32 },
    /// An inline size word is negative or would overflow in bytes.
    InvalidSizeField { size_words: i32 },
    /// An update disagrees with the carried item of the same key about size.
    ItemSizeMismatch {
        key: ItemKey,
        expected: usize,
        actual: usize,
    },
    /// An update payload runs past the end of the source.
    TruncatedPayload { needed: usize, available: usize },
    /// The builder refused an item carried over from the baseline.
    CarriedItemRejected { key: ItemKey },
    /// The builder refused an updated item.
    UpdateItemRejected { key: ItemKey },
}

impl UnpackError {
    /// The numeric error code peers agree on.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::TruncatedHeader { .. } | Self::TruncatedDeletedKeys { .. } => -101,
            Self::TruncatedUpdateHeader { .. } => -102,
            Self::TruncatedSizeField { .. } => -103,
            Self::NegativeCounter { .. } => -201,
            Self::TypeOutOfRange { .. } => -202,
            Self::IdOutOfRange { .. } => -203,
            Self::InvalidSizeField { .. } | Self::ItemSizeMismatch { .. } => -204,
            Self::TruncatedPayload { .. } => -205,
            Self::CarriedItemRejected { .. } => -301,
            Self::UpdateItemRejected { .. } => -302,
        }
    }
}

impl fmt::Display for UnpackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedHeader { available } => {
                write!(f, "delta header truncated: {available} bytes")
            }
            Self::TruncatedDeletedKeys {
                expected,
                available,
            } => write!(
                f,
                "deleted keys truncated: {expected} keys but {available} bytes"
            ),
            Self::TruncatedUpdateHeader { update } => {
                write!(f, "update {update} header truncated")
            }
            Self::TruncatedSizeField { update } => {
                write!(f, "update {update} size field truncated")
            }
            Self::NegativeCounter { field, value } => {
                write!(f, "negative {field} counter: {value}")
            }
            Self::TypeOutOfRange { type_id } => write!(f, "update type {type_id} out of range"),
            Self::IdOutOfRange { id } => write!(f, "update id {id} out of range"),
            Self::InvalidSizeField { size_words } => {
                write!(f, "invalid update size: {size_words} words")
            }
            Self::ItemSizeMismatch {
                key,
                expected,
                actual,
            } => write!(
                f,
                "update size {actual} disagrees with carried item {key:?} of size {expected}"
            ),
            Self::TruncatedPayload { needed, available } => {
                write!(f, "update payload truncated: need {needed}, have {available}")
            }
            Self::CarriedItemRejected { key } => {
                write!(f, "builder refused carried item {key:?}")
            }
            Self::UpdateItemRejected { key } => {
                write!(f, "builder refused updated item {key:?}")
            }
        }
    }
}

impl std::error::Error for UnpackError {}

/// Stateless-wire delta codec with per-type size hints and rate telemetry.
///
/// The static-size table lets update records for well-known types omit their
/// size word; both peers must register the same sizes. The telemetry
/// counters accumulate decoded bit-cost and update counts per internal type.
#[derive(Debug)]
pub struct SnapshotDelta {
    item_sizes: [i16; MAX_NETOBJ_SIZES],
    data_rates: Box<[u64]>,
    data_updates: Box<[u64]>,
}

impl Default for SnapshotDelta {
    fn default() -> Self {
        Self {
            item_sizes: [0; MAX_NETOBJ_SIZES],
            data_rates: vec![0; MAX_TYPE as usize + 1].into_boxed_slice(),
            data_updates: vec![0; MAX_TYPE as usize + 1].into_boxed_slice(),
        }
    }
}

impl SnapshotDelta {
    /// Creates a codec with no registered static sizes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The delta that encodes "no change": all three counters zero.
    #[must_use]
    pub fn empty_delta() -> &'static [u8] {
        const EMPTY: [u8; DELTA_HEADER_BYTES] = [0; DELTA_HEADER_BYTES];
        &EMPTY
    }

    /// Registers the fixed payload size of `type_id`; 0 clears.
    ///
    /// # Panics
    ///
    /// Panics when `type_id` lies outside the registry bound or `size_bytes`
    /// exceeds `i16::MAX` or is not word-aligned.
    pub fn set_static_size(&mut self, type_id: i32, size_bytes: usize) {
        assert!(
            (0..MAX_NETOBJ_SIZES as i32).contains(&type_id),
            "static size type {type_id} out of range"
        );
        assert!(
            size_bytes <= i16::MAX as usize,
            "static size {size_bytes} out of range"
        );
        assert!(size_bytes % 4 == 0, "static size must be word aligned");
        self.item_sizes[type_id as usize] = size_bytes as i16;
    }

    /// Returns the registered size of `type_id`, if any.
    #[must_use]
    pub fn static_size(&self, type_id: i32) -> Option<usize> {
        let size = *self.item_sizes.get(usize::try_from(type_id).ok()?)?;
        (size != 0).then_some(size as usize)
    }

    /// Accumulated decode bit-cost for `type_id`.
    #[must_use]
    pub fn data_rate(&self, type_id: i32) -> u64 {
        usize::try_from(type_id)
            .ok()
            .and_then(|index| self.data_rates.get(index))
            .copied()
            .unwrap_or(0)
    }

    /// Accumulated decoded update count for `type_id`.
    #[must_use]
    pub fn data_updates(&self, type_id: i32) -> u64 {
        usize::try_from(type_id)
            .ok()
            .and_then(|index| self.data_updates.get(index))
            .copied()
            .unwrap_or(0)
    }

    /// Encodes the delta that turns `from` into `to`.
    ///
    /// Writes the encoded delta into `out` (cleared first) and returns its
    /// byte length. Returns 0 with `out` left empty when the snapshots hold
    /// the same items; callers send nothing in that case.
    pub fn create_delta(&self, from: &Snapshot, to: &Snapshot, out: &mut Vec<u8>) -> usize {
        out.clear();
        out.extend_from_slice(&[0; DELTA_HEADER_BYTES]);
        let mut num_deleted = 0i32;
        let mut num_updates = 0i32;

        let to_index = KeyIndex::build(to);
        for index in 0..from.num_items() {
            let key = from.item_key(index);
            // A match that changed payload size is deleted here and re-sent
            // raw below; diffing across sizes is meaningless.
            let matched = find_index(to, &to_index, key)
                .is_some_and(|to_item| to.item_size(to_item) == from.item_size(index));
            if !matched {
                push_word(out, key.raw());
                num_deleted += 1;
            }
        }

        let from_index = KeyIndex::build(from);

        // Resolving the past indices up front keeps the diff loop walking
        // `from`'s item bodies sequentially.
        let past_indices: Vec<Option<usize>> = (0..to.num_items())
            .map(|index| find_index(from, &from_index, to.item_key(index)))
            .collect();

        let mut diff_buf: Vec<i32> = Vec::new();
        for index in 0..to.num_items() {
            let item = to.item(index);
            let size_words = item.data().len();
            if let Some(static_size) = self.static_size(item.type_id()) {
                debug_assert_eq!(
                    static_size,
                    size_words * 4,
                    "item of type {} disagrees with its registered static size",
                    item.type_id()
                );
            }
            let include_size = self.static_size(item.type_id()).is_none();
            let past = past_indices[index]
                .filter(|&past_index| from.item_size(past_index) == size_words * 4);

            match past {
                Some(past_index) => {
                    diff_buf.clear();
                    diff_buf.resize(size_words, 0);
                    if diff_item(from.item(past_index).data(), item.data(), &mut diff_buf) {
                        push_update_header(out, &item, include_size);
                        for &word in &diff_buf {
                            push_word(out, word);
                        }
                        num_updates += 1;
                    }
                }
                None => {
                    push_update_header(out, &item, include_size);
                    for &word in item.data() {
                        push_word(out, word);
                    }
                    num_updates += 1;
                }
            }
        }

        if num_deleted == 0 && num_updates == 0 {
            out.clear();
            return 0;
        }
        out[0..4].copy_from_slice(&num_deleted.to_le_bytes());
        out[4..8].copy_from_slice(&num_updates.to_le_bytes());
        // num_temp stays zero; the field is reserved.
        out.len()
    }

    /// Applies a delta received from the wire to the `from` baseline.
    ///
    /// # Errors
    ///
    /// Any malformed or truncated input rejects the whole delta; no partial
    /// snapshot is ever returned.
    pub fn unpack_delta(&mut self, from: &Snapshot, src: &[u8]) -> Result<Snapshot, UnpackError> {
        let mut reader = WordReader::new(src);
        let truncated_header = UnpackError::TruncatedHeader {
            available: src.len(),
        };
        let num_deleted = reader.read().ok_or(truncated_header)?;
        let num_updates = reader.read().ok_or(truncated_header)?;
        let num_temp = reader.read().ok_or(truncated_header)?;
        for (field, value) in [
            ("deleted", num_deleted),
            ("update", num_updates),
            ("temp", num_temp),
        ] {
            if value < 0 {
                return Err(UnpackError::NegativeCounter { field, value });
            }
        }

        let mut deleted = Vec::with_capacity(num_deleted.min(MAX_ITEMS as i32) as usize);
        for _ in 0..num_deleted {
            deleted.push(reader.read().ok_or(UnpackError::TruncatedDeletedKeys {
                expected: num_deleted as usize,
                available: src.len(),
            })?);
        }

        let mut builder = SnapshotBuilder::new();
        builder.init(false);

        // Carry everything the delta does not delete.
        for index in 0..from.num_items() {
            let key = from.item_key(index);
            if deleted.contains(&key.raw()) {
                continue;
            }
            let item = from.item(index);
            let slot = builder
                .append_item(item.type_id(), item.id(), item.data().len() * 4)
                .ok_or(UnpackError::CarriedItemRejected { key })?;
            slot.copy_from_slice(item.data());
        }

        let mut payload: Vec<i32> = Vec::new();
        for update in 0..num_updates as usize {
            let type_id = reader
                .read()
                .ok_or(UnpackError::TruncatedUpdateHeader { update })?;
            if !(0..=MAX_TYPE).contains(&type_id) {
                return Err(UnpackError::TypeOutOfRange { type_id });
            }
            let id = reader
                .read()
                .ok_or(UnpackError::TruncatedUpdateHeader { update })?;
            if !(0..=MAX_ID).contains(&id) {
                return Err(UnpackError::IdOutOfRange { id });
            }

            let size_bytes = match self.static_size(type_id) {
                Some(size) => size,
                None => {
                    let size_words = reader
                        .read()
                        .ok_or(UnpackError::TruncatedSizeField { update })?;
                    if size_words < 0 || size_words > i32::MAX / 4 {
                        return Err(UnpackError::InvalidSizeField { size_words });
                    }
                    size_words as usize * 4
                }
            };
            if reader.remaining_bytes() < size_bytes {
                return Err(UnpackError::TruncatedPayload {
                    needed: size_bytes,
                    available: reader.remaining_bytes(),
                });
            }
            payload.clear();
            for _ in 0..size_bytes / 4 {
                payload.push(reader.read().ok_or(UnpackError::TruncatedPayload {
                    needed: size_bytes,
                    available: reader.remaining_bytes(),
                })?);
            }

            let key = ItemKey::new(type_id, id);
            let slot = match builder.item_index(key) {
                Some(index) => {
                    let existing = builder.item_len_words(index) * 4;
                    if existing != size_bytes {
                        return Err(UnpackError::ItemSizeMismatch {
                            key,
                            expected: existing,
                            actual: size_bytes,
                        });
                    }
                    builder.item_data_mut(index)
                }
                None => builder
                    .append_item(type_id, id, size_bytes)
                    .ok_or(UnpackError::UpdateItemRejected { key })?,
            };

            // Undiff only against a baseline item of the same size; a size
            // change arrives as delete + raw re-add.
            let past = from
                .item_index(key)
                .filter(|&past_index| from.item_size(past_index) == size_bytes);
            match past {
                Some(past_index) => undiff_item(
                    from.item(past_index).data(),
                    &payload,
                    slot,
                    &mut self.data_rates[type_id as usize],
                ),
                None => {
                    slot.copy_from_slice(&payload);
                    self.data_rates[type_id as usize] += size_bytes as u64 * 8;
                }
            }
            self.data_updates[type_id as usize] += 1;
        }

        Ok(builder.finish())
    }
}

fn diff_item(past: &[i32], current: &[i32], out: &mut [i32]) -> bool {
    let mut needed = 0;
    for ((out_word, &past_word), &current_word) in out.iter_mut().zip(past).zip(current) {
        *out_word = (current_word as u32).wrapping_sub(past_word as u32) as i32;
        needed |= *out_word;
    }
    needed != 0
}

fn undiff_item(past: &[i32], diff: &[i32], out: &mut [i32], data_rate: &mut u64) {
    for ((out_word, &past_word), &diff_word) in out.iter_mut().zip(past).zip(diff) {
        *out_word = (past_word as u32).wrapping_add(diff_word as u32) as i32;
        *data_rate += if diff_word == 0 {
            1
        } else {
            varint::packed_len(diff_word) as u64 * 8
        };
    }
}

fn push_word(out: &mut Vec<u8>, word: i32) {
    out.extend_from_slice(&word.to_le_bytes());
}

fn push_update_header(out: &mut Vec<u8>, item: &crate::snapshot::SnapshotItem<'_>, include_size: bool) {
    push_word(out, item.type_id());
    push_word(out, item.id());
    if include_size {
        push_word(out, item.data().len() as i32);
    }
}

struct WordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WordReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read(&mut self) -> Option<i32> {
        let chunk = self.bytes.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    fn remaining_bytes(&self) -> usize {
        self.bytes.len() - self.pos
    }
}
