//! Fixed-capacity key index used by the delta encoder.
//!
//! Buckets that fill up stop accepting entries, so a miss is only
//! authoritative while the index is unsaturated; saturated lookups fall back
//! to a linear scan over the snapshot.

use crate::snapshot::Snapshot;
use crate::types::ItemKey;

const BUCKET_COUNT: usize = 256;
const BUCKET_CAPACITY: usize = 64;

#[derive(Debug)]
pub(crate) struct KeyIndex {
    buckets: Vec<Vec<(i32, u32)>>,
    saturated: bool,
}

impl KeyIndex {
    pub(crate) fn build(snapshot: &Snapshot) -> Self {
        let mut buckets = vec![Vec::new(); BUCKET_COUNT];
        let mut saturated = false;
        for index in 0..snapshot.num_items() {
            let key = snapshot.item_key(index).raw();
            let bucket: &mut Vec<(i32, u32)> = &mut buckets[hash_key(key)];
            if bucket.len() < BUCKET_CAPACITY {
                bucket.push((key, index as u32));
            } else {
                saturated = true;
            }
        }
        Self { buckets, saturated }
    }

    pub(crate) fn lookup(&self, key: ItemKey) -> Option<usize> {
        self.buckets[hash_key(key.raw())]
            .iter()
            .find(|(candidate, _)| *candidate == key.raw())
            .map(|(_, index)| *index as usize)
    }

    pub(crate) fn is_saturated(&self) -> bool {
        self.saturated
    }
}

/// Hashed lookup with linear-scan fallback once the index saturated.
pub(crate) fn find_index(snapshot: &Snapshot, index: &KeyIndex, key: ItemKey) -> Option<usize> {
    match index.lookup(key) {
        Some(found) => Some(found),
        None if index.is_saturated() => snapshot.item_index(key),
        None => None,
    }
}

// djb2 over the key's four bytes, low-order first.
fn hash_key(key: i32) -> usize {
    let mut hash: u32 = 5381;
    for shift in 0..4 {
        hash = hash
            .wrapping_mul(33)
            .wrapping_add(((key >> (shift * 8)) & 0xFF) as u32);
    }
    hash as usize % BUCKET_COUNT
}
