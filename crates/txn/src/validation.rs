//! Commit-time validation, per protocol
//!
//! Dispatch happens once per commit. SI validates nothing beyond the
//! write-write conflicts already detected at install time. SSI and
//! SSN share the exclusion-window check: with η the youngest
//! committed predecessor and π the oldest committed successor, a
//! transaction may commit only while η < π (or no successor exists).
//! MVOCC revalidates the read set: every version read must still be
//! the newest committed version at the end LSN. Every protocol
//! revalidates the absent set: a leaf whose version moved since it
//! was observed is a phantom.
//!
//! Successor discovery walks the chain segment above each read
//! version rather than trusting the overwriter stamp alone: a
//! transaction that has obtained its commit LSN but not yet finished
//! stamping counts as committed here, so validation races abort
//! conservatively instead of slipping through.

use crate::transaction::Transaction;
use cinder_core::{Error, Lsn, Oid, Protocol, Result, TxnState};
use cinder_storage::VersionPtr;

/// Run the protocol-specific validation, then the phantom check.
pub(crate) fn validate(txn: &Transaction, end: Lsn) -> Result<()> {
    match txn.protocol() {
        Protocol::Si => {}
        Protocol::Ssi | Protocol::Ssn => validate_exclusion(txn, end)?,
        Protocol::Mvocc => validate_reads(txn, end)?,
    }
    validate_absent(txn)
}

/// Oldest commit LSN ≤ `end` found on `oid`'s chain strictly above
/// `read_ptr`. A foreign writer that has published COMMITTING with an
/// end LSN within the bound is counted. Returns `Some(Lsn::ZERO)` if
/// the read version is no longer on the chain at all.
fn committed_successor(
    txn: &Transaction,
    oid: Oid,
    read_ptr: VersionPtr,
    end: Lsn,
) -> Result<Option<Lsn>> {
    let versions = txn.manager().versions();
    let mut oldest: Option<Lsn> = None;
    let mut cursor = txn.manager().oids().head(oid)?;
    while cursor.is_some() {
        if cursor == read_ptr {
            return Ok(oldest);
        }
        let stamp = versions.stamp(cursor);
        if let Some(lsn) = stamp.lsn() {
            if lsn <= end {
                oldest = Some(oldest.map_or(lsn, |o| o.min(lsn)));
            }
        } else if let Some(owner) = stamp.owner() {
            if owner != txn.xid() {
                if let Some(owner_ctx) = txn.manager().registry().get(owner) {
                    let owner_end = owner_ctx.end();
                    if matches!(
                        owner_ctx.state(),
                        TxnState::Committing | TxnState::Committed
                    ) && owner_end.is_valid()
                        && owner_end <= end
                    {
                        oldest = Some(oldest.map_or(owner_end, |o| o.min(owner_end)));
                    }
                }
            }
        }
        cursor = versions.prev(cursor);
    }
    // The read version fell off the chain; treat as superseded.
    Ok(Some(Lsn::ZERO))
}

/// Recompute η and π under the end LSN and test the exclusion
/// window.
///
/// Predecessors: the commit stamps of versions read (gathered during
/// the transaction) and, for each overwritten base, its commit stamp
/// and the high-watermark of its committed readers. Successors: the
/// commit stamps of transactions that overwrote versions this one
/// read and committed within `end`.
fn validate_exclusion(txn: &Transaction, end: Lsn) -> Result<()> {
    let versions = txn.manager().versions();
    let ctx = txn.ctx();

    for (oid, read) in txn.read_set() {
        if let Some(successor) = committed_successor(txn, *oid, read.ptr, end)? {
            ctx.observe_successor(successor);
        }
    }
    for write in txn.write_set().values() {
        if let Some(base_lsn) = write.base_stamp {
            ctx.observe_predecessor(base_lsn);
            ctx.observe_predecessor(versions.pstamp(write.base));
        }
    }

    if ctx.exclusion_violated() {
        return Err(Error::Serial {
            hi: ctx.hi(),
            lo: ctx.lo(),
        });
    }
    Ok(())
}

/// Revalidate that every read-set entry is still the visible version
/// at `end`. The transaction's own overwrites are harmless: its
/// uncommitted version sits above the read version and is not a
/// committed successor.
fn validate_reads(txn: &Transaction, end: Lsn) -> Result<()> {
    for (oid, read) in txn.read_set() {
        if committed_successor(txn, *oid, read.ptr, end)?.is_some() {
            return Err(Error::ReadValidation { oid: *oid });
        }
    }
    Ok(())
}

/// Compare every recorded leaf observation against the leaf's current
/// version.
fn validate_absent(txn: &Transaction) -> Result<()> {
    if !txn.manager().phantom_protection() {
        return Ok(());
    }
    for (index, leaf, observed) in txn.absent_set().iter() {
        let current = index.leaf_version(leaf).unwrap_or(0);
        if current != observed {
            return Err(Error::Phantom {
                leaf,
                observed,
                current,
            });
        }
    }
    Ok(())
}
