//! Transaction operations
//!
//! A [`Transaction`] owns its context, its epoch guard, and three
//! sets:
//! - the **read set**, keyed by OID: which version was read, with the
//!   stamp observed;
//! - the **write set**, keyed by OID: the uncommitted version this
//!   transaction installed and the committed base it replaced;
//! - the **absent set**, keyed by index-leaf identity: the leaf
//!   version observed by scans and point lookups, revalidated at
//!   commit to rule out phantoms.
//!
//! Every operation that can abort performs the rollback itself and
//! then returns the abort kind; a failed transaction never needs a
//! second call to clean up.

use crate::manager::TxnManager;
use crate::registry::XidContext;
use crate::validation;
use cinder_core::{
    Error, InsertResult, LeafMutation, Lsn, NodeObservation, Oid, OrderedMap, Protocol,
    RangeObserver, Result, ScanAction, Stamp, TxnState, Xid,
};
use cinder_log::{LogRecord, TxnLog};
use cinder_storage::{EpochGuard, VersionPtr};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of `insert`: either the key was new or it already existed.
/// Existence is not an abort; callers that want upsert semantics use
/// `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The key was absent and the record was created.
    Inserted,
    /// The key already exists; nothing was written.
    Exists,
}

pub(crate) struct ReadEntry {
    pub ptr: VersionPtr,
    pub stamp: Stamp,
}

pub(crate) struct WriteEntry {
    /// The uncommitted version this transaction installed.
    pub ptr: VersionPtr,
    /// The head it replaced (NIL for an insert).
    pub base: VersionPtr,
    /// The base's commit LSN, when the base was committed.
    pub base_stamp: Option<Lsn>,
}

/// Leaf observations, keyed by (index identity, leaf identity).
#[derive(Default)]
pub(crate) struct AbsentSet {
    indexes: Vec<Arc<dyn OrderedMap>>,
    observed: FxHashMap<(usize, u64), u64>,
}

impl AbsentSet {
    fn index_slot(&mut self, index: &Arc<dyn OrderedMap>) -> usize {
        if let Some(slot) = self.indexes.iter().position(|x| Arc::ptr_eq(x, index)) {
            slot
        } else {
            self.indexes.push(Arc::clone(index));
            self.indexes.len() - 1
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Arc<dyn OrderedMap>, u64, u64)> + '_ {
        self.observed
            .iter()
            .map(move |((slot, leaf), version)| (&self.indexes[*slot], *leaf, *version))
    }

    fn len(&self) -> usize {
        self.observed.len()
    }
}

/// An in-flight transaction.
pub struct Transaction {
    manager: Arc<TxnManager>,
    ctx: Arc<XidContext>,
    protocol: Protocol,
    read_only: bool,
    guard: Option<EpochGuard>,
    read_set: FxHashMap<Oid, ReadEntry>,
    write_set: FxHashMap<Oid, WriteEntry>,
    /// Install order, for deterministic stamping.
    write_order: SmallVec<[Oid; 8]>,
    absent: AbsentSet,
    log: Option<TxnLog>,
    released: bool,
}

impl Transaction {
    pub(crate) fn new(
        manager: Arc<TxnManager>,
        ctx: Arc<XidContext>,
        protocol: Protocol,
        read_only: bool,
        guard: EpochGuard,
        log: TxnLog,
    ) -> Self {
        Transaction {
            manager,
            ctx,
            protocol,
            read_only,
            guard: Some(guard),
            read_set: FxHashMap::default(),
            write_set: FxHashMap::default(),
            write_order: SmallVec::new(),
            absent: AbsentSet::default(),
            log: Some(log),
            released: false,
        }
    }

    /// This transaction's XID.
    pub fn xid(&self) -> Xid {
        self.ctx.xid()
    }

    /// The protocol chosen at begin.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Whether the transaction was begun read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxnState {
        self.ctx.state()
    }

    /// The snapshot LSN reads run under.
    pub fn begin_lsn(&self) -> Lsn {
        self.ctx.begin()
    }

    /// The commit LSN, once assigned.
    pub fn end_lsn(&self) -> Lsn {
        self.ctx.end()
    }

    pub(crate) fn manager(&self) -> &TxnManager {
        &self.manager
    }

    pub(crate) fn ctx(&self) -> &XidContext {
        &self.ctx
    }

    pub(crate) fn read_set(&self) -> &FxHashMap<Oid, ReadEntry> {
        &self.read_set
    }

    pub(crate) fn write_set(&self) -> &FxHashMap<Oid, WriteEntry> {
        &self.write_set
    }

    pub(crate) fn absent_set(&self) -> &AbsentSet {
        &self.absent
    }

    // === Lifecycle helpers ===

    fn ensure_active(&self) -> Result<()> {
        match self.ctx.state() {
            TxnState::Embryo => {
                self.ctx.set_state(TxnState::Active);
                Ok(())
            }
            TxnState::Active => Ok(()),
            other => Err(Error::InvalidState(format!("operation in {} state", other))),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_active()?;
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// Roll back if `result` carries an abort-class error. State
    /// errors leave the transaction usable.
    fn fail_on_abort<T>(&mut self, result: &Result<T>) {
        if let Err(e) = result {
            if e.is_abort() {
                self.rollback();
            }
        }
    }

    fn log_mut(&mut self) -> &mut TxnLog {
        self.log.as_mut().expect("log handle outlives operations")
    }

    // === Visibility ===

    /// Newest version of `oid` visible at `as_of`: this transaction's
    /// own uncommitted version, or the newest committed version with
    /// stamp ≤ `as_of`. Foreign uncommitted versions are skipped,
    /// never waited on; a version whose owner has already reached
    /// COMMITTED is re-read so the settled stamp decides.
    pub(crate) fn visible_as_of(
        &self,
        oid: Oid,
        as_of: Lsn,
    ) -> Result<Option<(VersionPtr, Stamp)>> {
        let versions = self.manager.versions();
        let mut cursor = self.manager.oids().head(oid)?;
        while cursor.is_some() {
            let stamp = versions.stamp(cursor);
            if stamp.is_aborted() {
                cursor = versions.prev(cursor);
                continue;
            }
            if let Some(owner) = stamp.owner() {
                if owner == self.ctx.xid() {
                    return Ok(Some((cursor, stamp)));
                }
                let settled = match self.manager.registry().get(owner) {
                    // Owner published COMMITTED after we loaded the
                    // stamp: the rewrite has happened, re-read.
                    Some(owner_ctx) if owner_ctx.state() == TxnState::Committed => true,
                    // Slot released: the stamp has settled one way or
                    // the other.
                    None => true,
                    // Active or still committing: skip, never wait.
                    Some(_) => false,
                };
                if settled {
                    let reread = versions.stamp(cursor);
                    if let Some(lsn) = reread.lsn() {
                        if lsn <= as_of {
                            return Ok(Some((cursor, reread)));
                        }
                    }
                }
                cursor = versions.prev(cursor);
                continue;
            }
            let lsn = stamp.lsn().expect("committed stamp carries an LSN");
            if lsn <= as_of {
                return Ok(Some((cursor, stamp)));
            }
            cursor = versions.prev(cursor);
        }
        Ok(None)
    }

    // === Set bookkeeping ===

    /// Record a leaf observation; an observation that contradicts an
    /// earlier one for the same leaf is already a phantom.
    fn record_absent(
        &mut self,
        index: &Arc<dyn OrderedMap>,
        observation: NodeObservation,
    ) -> Result<()> {
        if !self.manager.phantom_protection() || self.read_only {
            return Ok(());
        }
        let slot = self.absent.index_slot(index);
        match self.absent.observed.entry((slot, observation.leaf)) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                if *entry.get() != observation.version {
                    return Err(Error::Phantom {
                        leaf: observation.leaf,
                        observed: *entry.get(),
                        current: observation.version,
                    });
                }
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(observation.version);
            }
        }
        Ok(())
    }

    /// Reconcile the absent set with this transaction's own insert:
    /// an earlier observation of the mutated leaf must match the
    /// pre-insert version, and is advanced past the insert.
    fn absent_note_insert(
        &mut self,
        index: &Arc<dyn OrderedMap>,
        mutation: LeafMutation,
    ) -> Result<()> {
        if !self.manager.phantom_protection() {
            return Ok(());
        }
        let slot = self.absent.index_slot(index);
        if let Some(recorded) = self.absent.observed.get_mut(&(slot, mutation.leaf)) {
            if *recorded != mutation.old_version {
                return Err(Error::Phantom {
                    leaf: mutation.leaf,
                    observed: *recorded,
                    current: mutation.old_version,
                });
            }
            *recorded = mutation.new_version;
        }
        Ok(())
    }

    fn note_read(&mut self, oid: Oid, ptr: VersionPtr, stamp: Stamp) {
        if self.protocol.uses_exclusion_window() {
            if let Some(lsn) = stamp.lsn() {
                self.ctx.observe_predecessor(lsn);
            }
            let sstamp = self.manager.versions().sstamp(ptr);
            if sstamp.is_valid() {
                self.ctx.observe_successor(sstamp);
            }
        }
        self.read_set.entry(oid).or_insert(ReadEntry { ptr, stamp });
    }

    // === Operations ===

    /// Point read through `index`.
    pub fn get(&mut self, index: &Arc<dyn OrderedMap>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let result = self.try_get(index, key);
        self.fail_on_abort(&result);
        result
    }

    fn try_get(&mut self, index: &Arc<dyn OrderedMap>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_active()?;
        let (found, observation) = index.search(key);
        self.record_absent(index, observation)?;
        let oid = match found {
            Some(oid) => oid,
            None => return Ok(None),
        };
        let visible = self.visible_as_of(oid, self.ctx.begin())?;
        let (ptr, stamp) = match visible {
            Some(v) => v,
            None => return Ok(None),
        };
        if stamp.owner() != Some(self.ctx.xid()) {
            self.note_read(oid, ptr, stamp);
        }
        Ok(self.manager.versions().read_payload(ptr))
    }

    /// Insert `key → value`; `Exists` if the key is already bound.
    pub fn insert(
        &mut self,
        index: &Arc<dyn OrderedMap>,
        key: &[u8],
        value: &[u8],
    ) -> Result<InsertOutcome> {
        let result = self.try_insert(index, key, value);
        self.fail_on_abort(&result);
        result
    }

    fn try_insert(
        &mut self,
        index: &Arc<dyn OrderedMap>,
        key: &[u8],
        value: &[u8],
    ) -> Result<InsertOutcome> {
        self.ensure_writable()?;
        let worker = self.guard.as_ref().expect("epoch guard").worker();
        let manager = Arc::clone(&self.manager);
        let versions = manager.versions();
        let oid = manager.oids().alloc(worker)?;
        let version = versions.allocate(Stamp::owned(self.ctx.xid()), VersionPtr::NIL, Some(value))?;
        if !manager.oids().cas_head(oid, VersionPtr::NIL, version)? {
            return Err(Error::Internal(format!("fresh {} head was not NIL", oid)));
        }
        match index.insert_if_absent(key, oid) {
            InsertResult::Installed(mutation) => {
                if let Err(e) = self.absent_note_insert(index, mutation) {
                    // Unlink the pre-installed version before
                    // surfacing the phantom.
                    let _ = manager.oids().cas_head(oid, version, VersionPtr::NIL);
                    versions.defer_free(version);
                    return Err(e);
                }
                self.write_set.insert(
                    oid,
                    WriteEntry {
                        ptr: version,
                        base: VersionPtr::NIL,
                        base_stamp: None,
                    },
                );
                self.write_order.push(oid);
                self.log_mut().append(LogRecord::Insert {
                    oid: oid.as_u64(),
                    key: key.to_vec(),
                    value: value.to_vec(),
                });
                trace!(xid = %self.ctx.xid(), %oid, "inserted");
                Ok(InsertOutcome::Inserted)
            }
            InsertResult::Exists(_) => {
                let _ = manager.oids().cas_head(oid, version, VersionPtr::NIL);
                versions.defer_free(version);
                // The key is bound, but the record behind it may be
                // semantically absent: deleted (visible tombstone) or
                // emptied by an aborted insert. Re-inserting such a
                // key creates a new version on the existing OID.
                let (found, observation) = index.search(key);
                self.record_absent(index, observation)?;
                let existing = match found {
                    Some(existing) => existing,
                    None => {
                        return Err(Error::Internal("existing key vanished from index".into()))
                    }
                };
                match self.visible_as_of(existing, self.ctx.begin())? {
                    Some((ptr, _)) if versions.read_payload(ptr).is_some() => {
                        Ok(InsertOutcome::Exists)
                    }
                    _ => {
                        self.try_update_oid(existing, Some(value))?;
                        Ok(InsertOutcome::Inserted)
                    }
                }
            }
        }
    }

    /// Upsert: insert, or update the existing record when the key is
    /// already bound.
    pub fn put(&mut self, index: &Arc<dyn OrderedMap>, key: &[u8], value: &[u8]) -> Result<()> {
        let result = self.try_put(index, key, value);
        self.fail_on_abort(&result);
        result
    }

    fn try_put(&mut self, index: &Arc<dyn OrderedMap>, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let (found, observation) = index.search(key);
        self.record_absent(index, observation)?;
        if let Some(oid) = found {
            return self.try_update_oid(oid, Some(value));
        }
        match self.try_insert(index, key, value)? {
            InsertOutcome::Inserted => Ok(()),
            // Lost an insert race; the key is live now, so update it.
            InsertOutcome::Exists => {
                let (found, observation) = index.search(key);
                self.record_absent(index, observation)?;
                match found {
                    Some(oid) => self.try_update_oid(oid, Some(value)),
                    // Mappings are never removed from the index, so a
                    // key that just reported Exists cannot vanish.
                    None => Err(Error::Internal("existing key vanished from index".into())),
                }
            }
        }
    }

    /// Delete by key. Installs a tombstone version; the index mapping
    /// stays. Returns whether a visible record was deleted.
    pub fn remove(&mut self, index: &Arc<dyn OrderedMap>, key: &[u8]) -> Result<bool> {
        let result = self.try_remove(index, key);
        self.fail_on_abort(&result);
        result
    }

    fn try_remove(&mut self, index: &Arc<dyn OrderedMap>, key: &[u8]) -> Result<bool> {
        self.ensure_writable()?;
        let (found, observation) = index.search(key);
        self.record_absent(index, observation)?;
        let oid = match found {
            Some(oid) => oid,
            None => return Ok(false),
        };
        let visible = self.visible_as_of(oid, self.ctx.begin())?;
        let (ptr, stamp) = match visible {
            Some(v) => v,
            None => return Ok(false),
        };
        if stamp.owner() != Some(self.ctx.xid()) {
            self.note_read(oid, ptr, stamp);
        }
        if self.manager.versions().read_payload(ptr).is_none() {
            // Already a tombstone.
            return Ok(false);
        }
        self.try_update_oid(oid, None)?;
        Ok(true)
    }

    /// Install a new version on `oid`'s chain. `None` writes a
    /// deletion tombstone. A second write to the same OID inside this
    /// transaction replaces the uncommitted version's payload in
    /// place, keeping the chain at one uncommitted version.
    fn try_update_oid(&mut self, oid: Oid, value: Option<&[u8]>) -> Result<()> {
        self.ensure_writable()?;
        let manager = Arc::clone(&self.manager);
        let versions = manager.versions();
        if let Some(entry) = self.write_set.get(&oid) {
            let ptr = entry.ptr;
            versions.write_payload(ptr, value);
            self.log_mut().append(LogRecord::Update {
                oid: oid.as_u64(),
                value: value.map(<[u8]>::to_vec),
            });
            return Ok(());
        }

        let head = manager.oids().head(oid)?;
        let (base, base_stamp) = if head.is_some() {
            let stamp = versions.stamp(head);
            if let Some(owner) = stamp.owner() {
                if owner != self.ctx.xid() {
                    // Foreign write intent on the head: conflict,
                    // detected immediately, never waited out.
                    return Err(Error::WriteConflict { oid });
                }
                return Err(Error::Internal(format!(
                    "own uncommitted head on {} missing from write set",
                    oid
                )));
            }
            if stamp.is_aborted() {
                // A dead head mid-unlink; the unlinker owns it.
                return Err(Error::WriteConflict { oid });
            }
            let lsn = stamp.lsn().expect("committed stamp carries an LSN");
            if lsn > self.ctx.begin() {
                // The head committed after our snapshot; building on
                // it would lose that update.
                return Err(Error::WriteConflict { oid });
            }
            if self.protocol.uses_exclusion_window() {
                self.ctx.observe_predecessor(lsn);
                self.ctx.observe_predecessor(versions.pstamp(head));
            }
            (head, Some(lsn))
        } else {
            // Chain emptied by an aborted insert; this write
            // repopulates it.
            (VersionPtr::NIL, None)
        };

        let new = versions.allocate(Stamp::owned(self.ctx.xid()), base, value)?;
        if !manager.oids().cas_head(oid, base, new)? {
            versions.defer_free(new);
            return Err(Error::WriteConflict { oid });
        }
        self.write_set.insert(
            oid,
            WriteEntry {
                ptr: new,
                base,
                base_stamp,
            },
        );
        self.write_order.push(oid);
        self.log_mut().append(LogRecord::Update {
            oid: oid.as_u64(),
            value: value.map(<[u8]>::to_vec),
        });
        Ok(())
    }

    /// Ordered scan of `[low, high)` (`[low, ∞)` without `high`).
    /// Visible records are delivered to `cb`; tombstones and
    /// invisible versions are filtered.
    pub fn scan(
        &mut self,
        index: &Arc<dyn OrderedMap>,
        low: &[u8],
        high: Option<&[u8]>,
        cb: &mut dyn FnMut(&[u8], &[u8]) -> ScanAction,
    ) -> Result<()> {
        let result = self.try_range(index, ScanDirection::Forward { low, high }, cb);
        self.fail_on_abort(&result);
        result
    }

    /// Reverse scan from `high` (inclusive) down to `low`
    /// (exclusive; `-∞` without `low`).
    pub fn rscan(
        &mut self,
        index: &Arc<dyn OrderedMap>,
        high: &[u8],
        low: Option<&[u8]>,
        cb: &mut dyn FnMut(&[u8], &[u8]) -> ScanAction,
    ) -> Result<()> {
        let result = self.try_range(index, ScanDirection::Reverse { high, low }, cb);
        self.fail_on_abort(&result);
        result
    }

    fn try_range(
        &mut self,
        index: &Arc<dyn OrderedMap>,
        direction: ScanDirection<'_>,
        cb: &mut dyn FnMut(&[u8], &[u8]) -> ScanAction,
    ) -> Result<()> {
        self.ensure_active()?;
        let mut observer = TxnRangeObserver {
            txn: self,
            index,
            user: cb,
            error: None,
        };
        match direction {
            ScanDirection::Forward { low, high } => index.scan(low, high, &mut observer),
            ScanDirection::Reverse { high, low } => index.rscan(high, low, &mut observer),
        }
        match observer.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // === Commit / abort ===

    /// Run the commit protocol. On success the commit LSN is
    /// returned; on a validation failure the transaction is rolled
    /// back and the abort kind returned.
    pub fn commit(mut self) -> Result<Lsn> {
        let result = self.try_commit();
        match &result {
            Ok(end) => {
                debug!(xid = %self.ctx.xid(), %end, "transaction committed");
            }
            Err(e) => {
                debug!(xid = %self.ctx.xid(), error = %e, "commit failed");
                self.rollback();
            }
        }
        result
    }

    fn try_commit(&mut self) -> Result<Lsn> {
        match self.ctx.state() {
            TxnState::Embryo | TxnState::Active => {}
            other => return Err(Error::InvalidState(format!("commit in {} state", other))),
        }
        self.ctx.set_state(TxnState::Committing);

        let end = if self.write_set.is_empty() {
            // No writes: nothing to stamp, nothing to log. Snapshot
            // isolation needs no validation either; the other
            // protocols still validate reads and leaf observations
            // against the current tail.
            let end = if self.protocol == Protocol::Si {
                self.ctx.begin()
            } else {
                self.manager.log().tail()
            };
            self.ctx.set_end(end);
            if self.protocol != Protocol::Si {
                validation::validate(self, end)?;
            }
            if let Some(log) = self.log.take() {
                log.discard();
            }
            end
        } else {
            let log = self.log.take().expect("log handle");
            let end = log.commit(self.ctx.xid())?;
            self.ctx.set_end(end);
            validation::validate(self, end)?;

            let versions = self.manager.versions();
            // Stamp rewrites are release stores; once state flips to
            // COMMITTED below, readers observe every stamp.
            for oid in &self.write_order {
                let entry = &self.write_set[oid];
                versions.set_stamp(entry.ptr, Stamp::committed(end));
            }
            for entry in self.write_set.values() {
                if entry.base.is_some() {
                    versions.set_sstamp(entry.base, end);
                }
                versions.raise_pstamp(entry.ptr, end);
            }
            end
        };

        let versions = self.manager.versions();
        for read in self.read_set.values() {
            versions.raise_pstamp(read.ptr, end);
        }
        self.ctx.set_state(TxnState::Committed);
        trace!(
            xid = %self.ctx.xid(),
            reads = self.read_set.len(),
            writes = self.write_set.len(),
            absent = self.absent.len(),
            "commit published"
        );
        self.release_slot();
        Ok(end)
    }

    /// Abort at the caller's request.
    pub fn abort(mut self) {
        debug!(xid = %self.ctx.xid(), "transaction aborted by caller");
        self.rollback();
    }

    /// Unlink installed versions, discard the log batch, release the
    /// context. Idempotent.
    fn rollback(&mut self) {
        if self.released {
            return;
        }
        self.ctx.set_state(TxnState::Aborted);
        let manager = Arc::clone(&self.manager);
        let versions = manager.versions();
        let write_order = std::mem::take(&mut self.write_order);
        for oid in write_order.into_iter().rev() {
            if let Some(entry) = self.write_set.remove(&oid) {
                let unlinked = manager
                    .oids()
                    .cas_head(oid, entry.ptr, entry.base)
                    .unwrap_or(false);
                if unlinked {
                    versions.defer_free(entry.ptr);
                } else {
                    // Someone holds a reference we cannot fix up;
                    // leave a dead stamp for readers to skip.
                    versions.set_stamp(entry.ptr, Stamp::ABORTED);
                }
            }
        }
        if let Some(log) = self.log.take() {
            log.discard();
        }
        self.release_slot();
    }

    fn release_slot(&mut self) {
        self.released = true;
        self.manager.registry().free(self.ctx.xid());
        // Exiting the epoch invalidates every version pointer this
        // transaction holds; the sets are dropped with it.
        self.guard.take();
        self.manager.reclaim();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.released {
            self.rollback();
        }
    }
}

enum ScanDirection<'a> {
    Forward { low: &'a [u8], high: Option<&'a [u8]> },
    Reverse { high: &'a [u8], low: Option<&'a [u8]> },
}

/// Adapter between the index traversal and the transaction: records
/// leaf observations, applies visibility, and forwards visible
/// records to the user callback.
struct TxnRangeObserver<'a> {
    txn: &'a mut Transaction,
    index: &'a Arc<dyn OrderedMap>,
    user: &'a mut dyn FnMut(&[u8], &[u8]) -> ScanAction,
    error: Option<Error>,
}

impl RangeObserver for TxnRangeObserver<'_> {
    fn on_leaf(&mut self, observation: NodeObservation) -> ScanAction {
        match self.txn.record_absent(self.index, observation) {
            Ok(()) => ScanAction::Continue,
            Err(e) => {
                self.error = Some(e);
                ScanAction::Stop
            }
        }
    }

    fn on_entry(&mut self, key: &[u8], oid: Oid) -> ScanAction {
        let begin = self.txn.ctx().begin();
        match self.txn.visible_as_of(oid, begin) {
            Ok(Some((ptr, stamp))) => {
                if stamp.owner() != Some(self.txn.xid()) {
                    self.txn.note_read(oid, ptr, stamp);
                }
                match self.txn.manager().versions().read_payload(ptr) {
                    Some(payload) => (self.user)(key, &payload),
                    // Tombstone: invisible to the caller.
                    None => ScanAction::Continue,
                }
            }
            Ok(None) => ScanAction::Continue,
            Err(e) => {
                self.error = Some(e);
                ScanAction::Stop
            }
        }
    }
}
