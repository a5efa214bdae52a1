//! Registry mapping extended item types to UUIDs.
//!
//! External type ids below [`OFFSET_UUID`] are plain protocol types and never
//! touch this registry. Ids at or above [`OFFSET_UUID`] are UUID-qualified:
//! the registry assigns them sequentially at startup and resolves them in
//! both directions afterwards. The registry is passed explicitly to the
//! snapshot types that need it; there is no process-wide singleton.
//!
//! The registry must be fully populated before any snapshot operation runs
//! and is read-only in steady state.

use uuid::Uuid;

/// First UUID-qualified external type id.
pub const OFFSET_UUID: i32 = 1 << 16;

/// Namespace for name-derived type UUIDs.
pub const UUID_NAMESPACE: Uuid = Uuid::from_bytes([
    0xe0, 0x5d, 0xda, 0xaa, 0xc4, 0xe6, 0x4c, 0xfb, //
    0xb6, 0x42, 0x5d, 0x48, 0xe8, 0x0c, 0x00, 0x29,
]);

#[derive(Debug, Clone)]
struct Entry {
    uuid: Uuid,
    name: String,
}

/// Mapping between external type ids `>= OFFSET_UUID` and 128-bit UUIDs.
#[derive(Debug, Clone, Default)]
pub struct UuidRegistry {
    entries: Vec<Entry>,
}

impl UuidRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type under a name-derived UUID and returns its external id.
    ///
    /// The UUID is derived from [`UUID_NAMESPACE`] and `name` (UUIDv3), so
    /// peers registering the same names in the same order agree on both ids
    /// and UUIDs.
    ///
    /// # Panics
    ///
    /// Panics if `name` or the derived UUID is already registered; duplicate
    /// registration is a startup bug.
    pub fn register(&mut self, name: &str) -> i32 {
        let uuid = Uuid::new_v3(&UUID_NAMESPACE, name.as_bytes());
        self.register_uuid(name, uuid)
    }

    /// Registers a type under a caller-provided UUID and returns its external id.
    ///
    /// # Panics
    ///
    /// Panics if `name` or `uuid` is already registered.
    pub fn register_uuid(&mut self, name: &str, uuid: Uuid) -> i32 {
        assert!(
            self.entries.iter().all(|entry| entry.uuid != uuid),
            "uuid {uuid} registered twice"
        );
        assert!(
            self.entries.iter().all(|entry| entry.name != name),
            "type name {name:?} registered twice"
        );
        let external = OFFSET_UUID + self.entries.len() as i32;
        self.entries.push(Entry {
            uuid,
            name: name.to_owned(),
        });
        external
    }

    /// Resolves a UUID back to its external type id, if registered.
    #[must_use]
    pub fn lookup_uuid(&self, uuid: &Uuid) -> Option<i32> {
        self.entries
            .iter()
            .position(|entry| entry.uuid == *uuid)
            .map(|index| OFFSET_UUID + index as i32)
    }

    /// Returns the UUID for a registered external type id.
    ///
    /// # Panics
    ///
    /// Panics if `external_type` was never registered; callers only hand in
    /// ids the startup code assigned.
    #[must_use]
    pub fn uuid(&self, external_type: i32) -> Uuid {
        self.entry(external_type).uuid
    }

    /// Returns the name a registered external type id was registered under.
    #[must_use]
    pub fn name(&self, external_type: i32) -> &str {
        &self.entry(external_type).name
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, external_type: i32) -> &Entry {
        let index = external_type - OFFSET_UUID;
        assert!(
            index >= 0 && (index as usize) < self.entries.len(),
            "external type {external_type} not registered"
        );
        &self.entries[index as usize]
    }
}

/// Packs a UUID into four big-endian words, the indirection-item payload form.
#[must_use]
pub fn uuid_to_words(uuid: &Uuid) -> [i32; 4] {
    let bytes = uuid.as_bytes();
    let mut words = [0i32; 4];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

/// Rebuilds a UUID from four big-endian words.
///
/// # Panics
///
/// Panics if `words` holds fewer than four entries.
#[must_use]
pub fn words_to_uuid(words: &[i32]) -> Uuid {
    let mut bytes = [0u8; 16];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_sequential_ids() {
        let mut registry = UuidRegistry::new();
        assert_eq!(registry.register("obj.projectile"), OFFSET_UUID);
        assert_eq!(registry.register("obj.laser"), OFFSET_UUID + 1);
        assert_eq!(registry.register("obj.pickup"), OFFSET_UUID + 2);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn lookup_roundtrip() {
        let mut registry = UuidRegistry::new();
        let id = registry.register("obj.laser");
        let uuid = registry.uuid(id);
        assert_eq!(registry.lookup_uuid(&uuid), Some(id));
        assert_eq!(registry.name(id), "obj.laser");
    }

    #[test]
    fn lookup_unknown_uuid_is_none() {
        let registry = UuidRegistry::new();
        assert_eq!(registry.lookup_uuid(&Uuid::nil()), None);
    }

    #[test]
    fn name_derivation_is_deterministic() {
        let mut a = UuidRegistry::new();
        let mut b = UuidRegistry::new();
        let id_a = a.register("obj.flag");
        let id_b = b.register("obj.flag");
        assert_eq!(a.uuid(id_a), b.uuid(id_b));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_name_panics() {
        let mut registry = UuidRegistry::new();
        registry.register("obj.flag");
        registry.register("obj.flag");
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn unknown_external_type_panics() {
        let registry = UuidRegistry::new();
        let _ = registry.uuid(OFFSET_UUID);
    }

    #[test]
    fn word_packing_roundtrip() {
        let uuid = Uuid::new_v3(&UUID_NAMESPACE, b"obj.pickup");
        let words = uuid_to_words(&uuid);
        assert_eq!(words_to_uuid(&words), uuid);
    }

    #[test]
    fn word_packing_is_big_endian() {
        let uuid = Uuid::from_bytes([
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, //
            0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10,
        ]);
        assert_eq!(
            uuid_to_words(&uuid),
            [0x0102_0304, 0x0506_0708, 0x090A_0B0C, 0x0D0E_0F10]
        );
    }
}
