//! Fence-keyed leaf pages
//!
//! The index is a directory of leaf pages keyed by their low fence.
//! Each leaf covers the half-open key range `[low, high)` (the last
//! leaf's high fence is +∞) and stores its entries sorted. A leaf
//! splits when it reaches the fanout; the split shrinks the old
//! leaf's key set and therefore bumps its version, which is exactly
//! what a recorded absent-set observation needs to notice.
//!
//! Fences are never removed: leaves split but never merge, so a low
//! fence observed once stays a valid directory key for the life of
//! the index. Traversals navigate by fence and re-resolve through the
//! directory when a concurrent split moves a range out from under
//! them.
//!
//! Locking protocol: the directory lock is never held while a leaf
//! lock is acquired; a thread holding a leaf lock may take the
//! directory lock (the split path does). Entries are copied out of a
//! leaf before the observer runs, so no index lock is held during
//! callbacks.

use cinder_core::{
    InsertResult, LeafMutation, NodeObservation, Oid, OrderedMap, RangeObserver, ScanAction,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

type Entries = SmallVec<[(Box<[u8]>, Oid); 8]>;

struct LeafInner {
    /// Sorted by key.
    entries: Vec<(Box<[u8]>, Oid)>,
    /// Inclusive low fence.
    low: Box<[u8]>,
    /// Exclusive high fence; `None` is +∞.
    high: Option<Box<[u8]>>,
}

impl LeafInner {
    fn covers(&self, key: &[u8]) -> bool {
        key >= self.low.as_ref() && self.high.as_deref().map(|high| key < high).unwrap_or(true)
    }
}

struct Leaf {
    id: u64,
    version: AtomicU64,
    inner: RwLock<LeafInner>,
}

impl Leaf {
    fn observe(&self) -> NodeObservation {
        NodeObservation {
            leaf: self.id,
            version: self.version.load(Ordering::Acquire),
        }
    }
}

/// One leaf's state copied out under its read lock.
struct LeafSnapshot {
    observation: NodeObservation,
    entries: Entries,
    low: Box<[u8]>,
    high: Option<Box<[u8]>>,
}

/// Ordered map from byte keys to OIDs, built from fence-keyed leaves.
pub struct LeafIndex {
    directory: RwLock<BTreeMap<Box<[u8]>, Arc<Leaf>>>,
    by_id: RwLock<FxHashMap<u64, Arc<Leaf>>>,
    next_leaf_id: AtomicU64,
    fanout: usize,
}

impl LeafIndex {
    /// Create an index whose leaves split at `fanout` entries.
    pub fn new(fanout: usize) -> Self {
        let root = Arc::new(Leaf {
            id: 0,
            version: AtomicU64::new(1),
            inner: RwLock::new(LeafInner {
                entries: Vec::new(),
                low: Box::from(&[][..]),
                high: None,
            }),
        });
        let mut directory = BTreeMap::new();
        directory.insert(Box::from(&[][..]), Arc::clone(&root));
        let mut by_id = FxHashMap::default();
        by_id.insert(0, root);
        LeafIndex {
            directory: RwLock::new(directory),
            by_id: RwLock::new(by_id),
            next_leaf_id: AtomicU64::new(1),
            fanout: fanout.max(2),
        }
    }

    /// The leaf whose fence range should contain `key`. The directory
    /// lock is released before returning.
    fn leaf_for(&self, key: &[u8]) -> Arc<Leaf> {
        let directory = self.directory.read();
        let (_, leaf) = directory
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .expect("directory always holds the empty-fence leaf");
        Arc::clone(leaf)
    }

    /// The leaf with the largest low fence strictly below `fence`.
    fn leaf_before(&self, fence: &[u8]) -> Option<Arc<Leaf>> {
        let directory = self.directory.read();
        directory
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(fence)))
            .next_back()
            .map(|(_, leaf)| Arc::clone(leaf))
    }

    /// Split `leaf` in half. Called with the leaf write guard held;
    /// taking the directory lock on top of it is within the locking
    /// protocol.
    fn split(&self, leaf: &Leaf, inner: &mut LeafInner) {
        let split_at = inner.entries.len() / 2;
        let right_entries = inner.entries.split_off(split_at);
        let right_low: Box<[u8]> = right_entries[0].0.clone();
        let right = Arc::new(Leaf {
            id: self.next_leaf_id.fetch_add(1, Ordering::Relaxed),
            version: AtomicU64::new(1),
            inner: RwLock::new(LeafInner {
                entries: right_entries,
                low: right_low.clone(),
                high: inner.high.take(),
            }),
        });
        inner.high = Some(right_low.clone());
        // The key set of the left leaf shrank: structural mutation.
        leaf.version.fetch_add(1, Ordering::AcqRel);
        let right_id = right.id;
        self.by_id.write().insert(right_id, Arc::clone(&right));
        self.directory.write().insert(right_low, right);
        trace!(left = leaf.id, right = right_id, "leaf split");
    }

    /// Copy a leaf's observation, fences, and in-range entries out
    /// under its read lock.
    fn snapshot_range(&self, leaf: &Leaf, low: Bound<&[u8]>, high: Bound<&[u8]>) -> LeafSnapshot {
        let inner = leaf.inner.read();
        let observation = leaf.observe();
        let in_low = |key: &[u8]| match low {
            Bound::Included(b) => key >= b,
            Bound::Excluded(b) => key > b,
            Bound::Unbounded => true,
        };
        let in_high = |key: &[u8]| match high {
            Bound::Included(b) => key <= b,
            Bound::Excluded(b) => key < b,
            Bound::Unbounded => true,
        };
        LeafSnapshot {
            observation,
            entries: inner
                .entries
                .iter()
                .filter(|(key, _)| in_low(key) && in_high(key))
                .map(|(key, oid)| (key.clone(), *oid))
                .collect(),
            low: inner.low.clone(),
            high: inner.high.clone(),
        }
    }
}

impl OrderedMap for LeafIndex {
    fn search(&self, key: &[u8]) -> (Option<Oid>, NodeObservation) {
        loop {
            let leaf = self.leaf_for(key);
            let inner = leaf.inner.read();
            if !inner.covers(key) {
                // A split moved the range while we were between the
                // directory and the leaf; re-resolve.
                continue;
            }
            let found = inner
                .entries
                .binary_search_by(|(k, _)| k.as_ref().cmp(key))
                .ok()
                .map(|pos| inner.entries[pos].1);
            return (found, leaf.observe());
        }
    }

    fn insert_if_absent(&self, key: &[u8], oid: Oid) -> InsertResult {
        loop {
            let leaf = self.leaf_for(key);
            let mut inner = leaf.inner.write();
            if !inner.covers(key) {
                continue;
            }
            match inner.entries.binary_search_by(|(k, _)| k.as_ref().cmp(key)) {
                Ok(_) => return InsertResult::Exists(leaf.observe()),
                Err(pos) => {
                    if inner.entries.len() >= self.fanout {
                        self.split(&leaf, &mut inner);
                        // The key may belong to either half now;
                        // re-resolve from the directory.
                        continue;
                    }
                    inner.entries.insert(pos, (Box::from(key), oid));
                    let old_version = leaf.version.fetch_add(1, Ordering::AcqRel);
                    return InsertResult::Installed(LeafMutation {
                        leaf: leaf.id,
                        old_version,
                        new_version: old_version + 1,
                    });
                }
            }
        }
    }

    fn scan(&self, low: &[u8], high: Option<&[u8]>, observer: &mut dyn RangeObserver) {
        let high_bound = match high {
            Some(high) => Bound::Excluded(high),
            None => Bound::Unbounded,
        };
        let mut cursor: Box<[u8]> = Box::from(low);
        loop {
            let leaf = self.leaf_for(&cursor);
            let snapshot = self.snapshot_range(&leaf, Bound::Included(&*cursor), high_bound);
            let covered = cursor.as_ref() >= snapshot.low.as_ref()
                && snapshot
                    .high
                    .as_deref()
                    .map(|h| cursor.as_ref() < h)
                    .unwrap_or(true);
            if !covered {
                // Raced a split; retry the same cursor position.
                continue;
            }
            if observer.on_leaf(snapshot.observation) == ScanAction::Stop {
                return;
            }
            for (key, oid) in &snapshot.entries {
                if observer.on_entry(key, *oid) == ScanAction::Stop {
                    return;
                }
            }
            match snapshot.high {
                Some(next) => {
                    if high.map(|h| next.as_ref() >= h).unwrap_or(false) {
                        return;
                    }
                    cursor = next;
                }
                None => return,
            }
        }
    }

    fn rscan(&self, high: &[u8], low: Option<&[u8]>, observer: &mut dyn RangeObserver) {
        let low_bound = match low {
            Some(low) => Bound::Excluded(low),
            None => Bound::Unbounded,
        };
        // Low fence of the previously delivered leaf; everything at
        // or above it is done.
        let mut boundary: Option<Box<[u8]>> = None;
        let mut leaf = self.leaf_for(high);
        loop {
            let snapshot = self.snapshot_range(&leaf, low_bound, Bound::Included(high));
            let valid = match boundary.as_deref() {
                // Interior step: this leaf must abut the boundary
                // from below, else a split slid a leaf in between.
                Some(boundary) => snapshot.high.as_deref() == Some(boundary),
                // First step: the leaf must cover the scan origin.
                None => {
                    high >= snapshot.low.as_ref()
                        && snapshot.high.as_deref().map(|h| high < h).unwrap_or(true)
                }
            };
            if !valid {
                leaf = match boundary.as_deref() {
                    Some(boundary) => match self.leaf_before(boundary) {
                        Some(prev) => prev,
                        None => return,
                    },
                    None => self.leaf_for(high),
                };
                continue;
            }
            if observer.on_leaf(snapshot.observation) == ScanAction::Stop {
                return;
            }
            for (key, oid) in snapshot.entries.iter().rev() {
                if observer.on_entry(key, *oid) == ScanAction::Stop {
                    return;
                }
            }
            if let Some(low) = low {
                if snapshot.low.as_ref() <= low {
                    return;
                }
            }
            if snapshot.low.is_empty() {
                return;
            }
            leaf = match self.leaf_before(&snapshot.low) {
                Some(prev) => prev,
                None => return,
            };
            boundary = Some(snapshot.low);
        }
    }

    fn leaf_version(&self, leaf: u64) -> Option<u64> {
        let by_id = self.by_id.read();
        by_id
            .get(&leaf)
            .map(|leaf| leaf.version.load(Ordering::Acquire))
    }

    fn len(&self) -> usize {
        let leaves: Vec<Arc<Leaf>> = {
            let directory = self.directory.read();
            directory.values().cloned().collect()
        };
        leaves
            .iter()
            .map(|leaf| leaf.inner.read().entries.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    /// Observer that collects everything and never stops.
    #[derive(Default)]
    struct Collector {
        leaves: Vec<NodeObservation>,
        entries: Vec<(Vec<u8>, Oid)>,
        /// Index into `entries` at the moment each leaf was
        /// observed, to check on_leaf-before-entries ordering.
        leaf_marks: Vec<usize>,
    }

    impl RangeObserver for Collector {
        fn on_leaf(&mut self, observation: NodeObservation) -> ScanAction {
            self.leaves.push(observation);
            self.leaf_marks.push(self.entries.len());
            ScanAction::Continue
        }

        fn on_entry(&mut self, key: &[u8], oid: Oid) -> ScanAction {
            self.entries.push((key.to_vec(), oid));
            ScanAction::Continue
        }
    }

    /// Observer that stops after `limit` entries.
    struct Limited {
        limit: usize,
        entries: Vec<Vec<u8>>,
    }

    impl RangeObserver for Limited {
        fn on_leaf(&mut self, _observation: NodeObservation) -> ScanAction {
            ScanAction::Continue
        }

        fn on_entry(&mut self, key: &[u8], _oid: Oid) -> ScanAction {
            self.entries.push(key.to_vec());
            if self.entries.len() >= self.limit {
                ScanAction::Stop
            } else {
                ScanAction::Continue
            }
        }
    }

    fn populated(fanout: usize, n: u64) -> LeafIndex {
        let index = LeafIndex::new(fanout);
        let mut keys: Vec<u64> = (0..n).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        keys.shuffle(&mut rng);
        for k in keys {
            let installed = index.insert_if_absent(&k.to_be_bytes(), Oid::new(k));
            assert!(matches!(installed, InsertResult::Installed(_)));
        }
        index
    }

    #[test]
    fn search_miss_still_returns_observation() {
        let index = LeafIndex::new(4);
        let (found, observation) = index.search(b"nope");
        assert_eq!(found, None);
        assert_eq!(observation.leaf, 0);
        assert!(observation.version >= 1);
    }

    #[test]
    fn insert_then_search() {
        let index = LeafIndex::new(4);
        let result = index.insert_if_absent(b"k1", Oid::new(9));
        let mutation = match result {
            InsertResult::Installed(m) => m,
            other => panic!("expected install, got {:?}", other),
        };
        assert!(mutation.new_version > mutation.old_version);

        let (found, observation) = index.search(b"k1");
        assert_eq!(found, Some(Oid::new(9)));
        assert_eq!(observation.leaf, mutation.leaf);
        assert_eq!(observation.version, mutation.new_version);
    }

    #[test]
    fn duplicate_insert_reports_exists() {
        let index = LeafIndex::new(4);
        index.insert_if_absent(b"k", Oid::new(1));
        match index.insert_if_absent(b"k", Oid::new(2)) {
            InsertResult::Exists(observation) => assert_eq!(observation.leaf, 0),
            other => panic!("expected exists, got {:?}", other),
        }
        let (found, _) = index.search(b"k");
        assert_eq!(found, Some(Oid::new(1)));
    }

    #[test]
    fn insert_bumps_the_observed_leaf_version() {
        let index = LeafIndex::new(64);
        let (_, before) = index.search(b"absent");
        index.insert_if_absent(b"absent", Oid::new(1));
        let (_, after) = index.search(b"absent");
        assert_eq!(before.leaf, after.leaf);
        assert!(after.version > before.version);
    }

    #[test]
    fn leaf_version_lookup_tracks_observations() {
        let index = LeafIndex::new(4);
        let (_, observation) = index.search(b"a");
        assert_eq!(index.leaf_version(observation.leaf), Some(observation.version));
        assert_eq!(index.leaf_version(9999), None);

        index.insert_if_absent(b"a", Oid::new(1));
        let current = index.leaf_version(observation.leaf).unwrap();
        assert!(current > observation.version);
    }

    #[test]
    fn split_preserves_all_mappings() {
        let index = populated(4, 100);
        assert_eq!(index.len(), 100);
        for k in 0u64..100 {
            let (found, _) = index.search(&k.to_be_bytes());
            assert_eq!(found, Some(Oid::new(k)), "key {} lost after splits", k);
        }
    }

    #[test]
    fn scan_is_ordered_and_bounded() {
        let index = populated(8, 64);
        let mut collector = Collector::default();
        index.scan(&10u64.to_be_bytes(), Some(&20u64.to_be_bytes()), &mut collector);
        let keys: Vec<u64> = collector
            .entries
            .iter()
            .map(|(k, _)| u64::from_be_bytes(k.as_slice().try_into().unwrap()))
            .collect();
        assert_eq!(keys, (10..20).collect::<Vec<_>>());
    }

    #[test]
    fn scan_without_high_reaches_the_end() {
        let index = populated(8, 32);
        let mut collector = Collector::default();
        index.scan(&30u64.to_be_bytes(), None, &mut collector);
        let keys: Vec<u64> = collector
            .entries
            .iter()
            .map(|(k, _)| u64::from_be_bytes(k.as_slice().try_into().unwrap()))
            .collect();
        assert_eq!(keys, vec![30, 31]);
    }

    #[test]
    fn scan_observes_each_leaf_before_its_entries() {
        let index = populated(4, 40);
        let mut collector = Collector::default();
        index.scan(&0u64.to_be_bytes(), None, &mut collector);
        assert!(collector.leaves.len() > 1, "expected multiple leaves");
        // First mark is 0: a leaf observation precedes any entry.
        assert_eq!(collector.leaf_marks[0], 0);
        // Marks never exceed the number of entries delivered so far.
        for (i, mark) in collector.leaf_marks.iter().enumerate().skip(1) {
            assert!(*mark >= collector.leaf_marks[i - 1]);
        }
        // Distinct leaves.
        let mut ids: Vec<u64> = collector.leaves.iter().map(|o| o.leaf).collect();
        ids.dedup();
        assert_eq!(ids.len(), collector.leaves.len());
    }

    #[test]
    fn scan_stop_halts_traversal() {
        let index = populated(8, 64);
        let mut limited = Limited {
            limit: 5,
            entries: Vec::new(),
        };
        index.scan(&0u64.to_be_bytes(), None, &mut limited);
        assert_eq!(limited.entries.len(), 5);
    }

    #[test]
    fn rscan_descends_from_high_inclusive() {
        let index = populated(8, 64);
        let mut collector = Collector::default();
        index.rscan(&20u64.to_be_bytes(), Some(&10u64.to_be_bytes()), &mut collector);
        let keys: Vec<u64> = collector
            .entries
            .iter()
            .map(|(k, _)| u64::from_be_bytes(k.as_slice().try_into().unwrap()))
            .collect();
        assert_eq!(keys, (11..=20).rev().collect::<Vec<_>>());
    }

    #[test]
    fn rscan_without_low_reaches_the_start() {
        let index = populated(4, 32);
        let mut collector = Collector::default();
        index.rscan(&5u64.to_be_bytes(), None, &mut collector);
        let keys: Vec<u64> = collector
            .entries
            .iter()
            .map(|(k, _)| u64::from_be_bytes(k.as_slice().try_into().unwrap()))
            .collect();
        assert_eq!(keys, vec![5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn concurrent_inserts_and_searches() {
        let index = Arc::new(LeafIndex::new(8));
        let threads = 4;
        let per_thread = 500u64;
        let mut handles = Vec::new();
        for t in 0..threads {
            let index = Arc::clone(&index);
            handles.push(std::thread::spawn(move || {
                for i in 0..per_thread {
                    let key = (t * per_thread + i).to_be_bytes();
                    index.insert_if_absent(&key, Oid::new(t * per_thread + i));
                    let (found, _) = index.search(&key);
                    assert_eq!(found, Some(Oid::new(t * per_thread + i)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(index.len(), (threads * per_thread) as usize);
    }

    proptest! {
        #[test]
        fn scan_matches_sorted_reference(
            mut keys in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 1..6), 1..80)
        ) {
            keys.sort();
            keys.dedup();
            let index = LeafIndex::new(4);
            for (i, key) in keys.iter().enumerate() {
                index.insert_if_absent(key, Oid::new(i as u64));
            }
            let mut collector = Collector::default();
            index.scan(&[], None, &mut collector);
            let scanned: Vec<Vec<u8>> =
                collector.entries.iter().map(|(k, _)| k.clone()).collect();
            prop_assert_eq!(scanned, keys);
        }
    }
}
