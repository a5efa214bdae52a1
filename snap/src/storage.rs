//! Bounded storage of recent snapshots keyed by tick.

use std::collections::VecDeque;

use crate::limits::MAX_SNAPSHOT_SIZE;
use crate::snapshot::Snapshot;

/// One stored tick: the snapshot, an optional derived alternate view, and
/// the capture timestamp used for round-trip accounting.
#[derive(Debug, Clone)]
pub struct SnapshotHolder {
    tick: i32,
    tagtime: i64,
    snap: Snapshot,
    alt_snap: Option<Snapshot>,
}

impl SnapshotHolder {
    /// The tick this snapshot was captured at.
    #[must_use]
    pub fn tick(&self) -> i32 {
        self.tick
    }

    /// Opaque capture timestamp.
    #[must_use]
    pub fn tagtime(&self) -> i64 {
        self.tagtime
    }

    /// The primary snapshot.
    #[must_use]
    pub fn snap(&self) -> &Snapshot {
        &self.snap
    }

    /// The alternate snapshot, if one was stored.
    #[must_use]
    pub fn alt_snap(&self) -> Option<&Snapshot> {
        self.alt_snap.as_ref()
    }

    /// Blob size of the primary snapshot.
    #[must_use]
    pub fn snap_size(&self) -> usize {
        self.snap.total_size()
    }
}

/// History of recent snapshots, ordered by insertion.
///
/// Ticks arrive in non-decreasing order, so the only operations needed are
/// append at the tail, purge from the head, and a linear tick search over a
/// window that stays a few seconds long.
#[derive(Debug, Default)]
pub struct SnapshotStorage {
    holders: VecDeque<SnapshotHolder>,
}

impl SnapshotStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a snapshot (and optional alternate) for `tick` at the tail.
    ///
    /// # Panics
    ///
    /// Panics if either payload exceeds the per-snapshot byte cap; feeding
    /// oversized snapshots into storage is a bug in the producer.
    pub fn add(&mut self, tick: i32, tagtime: i64, snap: Snapshot, alt_snap: Option<Snapshot>) {
        assert!(
            snap.data_size() <= MAX_SNAPSHOT_SIZE,
            "snapshot data size invalid"
        );
        assert!(
            alt_snap
                .as_ref()
                .map_or(true, |alt| alt.data_size() <= MAX_SNAPSHOT_SIZE),
            "alt snapshot data size invalid"
        );
        self.holders.push_back(SnapshotHolder {
            tick,
            tagtime,
            snap,
            alt_snap,
        });
    }

    /// Drops every stored snapshot.
    pub fn purge_all(&mut self) {
        self.holders.clear();
    }

    /// Drops every holder older than `tick`, keeping holders at or past it.
    pub fn purge_until(&mut self, tick: i32) {
        let before = self.holders.len();
        while self
            .holders
            .front()
            .is_some_and(|holder| holder.tick < tick)
        {
            self.holders.pop_front();
        }
        let purged = before - self.holders.len();
        if purged > 0 {
            tracing::debug!(purged, tick, remaining = self.holders.len(), "purged snapshots");
        }
    }

    /// Finds the holder stored for exactly `tick`.
    #[must_use]
    pub fn get(&self, tick: i32) -> Option<&SnapshotHolder> {
        self.holders.iter().find(|holder| holder.tick == tick)
    }

    /// The oldest stored holder.
    #[must_use]
    pub fn first(&self) -> Option<&SnapshotHolder> {
        self.holders.front()
    }

    /// The newest stored holder.
    #[must_use]
    pub fn last(&self) -> Option<&SnapshotHolder> {
        self.holders.back()
    }

    /// Number of stored holders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// Iterates holders from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &SnapshotHolder> {
        self.holders.iter()
    }
}
