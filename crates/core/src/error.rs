//! Error taxonomy
//!
//! Aborts are local to the failing transaction and are always
//! surfaced as a result; there is no non-local unwind anywhere in the
//! engine. The abort kinds mirror the validation that produced them:
//!
//! - `WriteConflict` — another transaction holds an uncommitted write
//!   on a chain we need to mutate
//! - `Serial` — the η < π exclusion window is empty at commit
//! - `ReadValidation` — a read-set entry is no longer the visible
//!   version under the begin snapshot
//! - `Phantom` — an index leaf observed by a scan or failed lookup
//!   changed before commit
//!
//! `thiserror` provides Display/Error; classification helpers follow
//! so callers can branch on category instead of variant.

use crate::types::{Lsn, Oid};
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the engine core.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Another transaction holds an uncommitted write on this chain.
    #[error("write conflict on {oid}")]
    WriteConflict {
        /// The contended record.
        oid: Oid,
    },

    /// SSN/SSI exclusion failed: the youngest committed predecessor
    /// is not older than the oldest committed successor.
    #[error("serial exclusion failure: eta {hi} >= pi {lo}")]
    Serial {
        /// η at validation time.
        hi: Lsn,
        /// π at validation time.
        lo: Lsn,
    },

    /// MVOCC read revalidation failed for this record.
    #[error("read validation failed on {oid}")]
    ReadValidation {
        /// The record whose visible version changed.
        oid: Oid,
    },

    /// An index leaf recorded in the absent set was mutated.
    #[error("phantom on index leaf {leaf}: observed version {observed}, current {current}")]
    Phantom {
        /// Identity of the mutated leaf.
        leaf: u64,
        /// Leaf version when first observed.
        observed: u64,
        /// Leaf version at validation time.
        current: u64,
    },

    /// Index or allocator invariant violation, surfaced as an abort.
    #[error("internal invariant violation: {0}")]
    Internal(String),

    /// The caller invoked abort.
    #[error("aborted by caller")]
    UserAbort,

    /// Operation attempted in a state that does not allow it.
    #[error("invalid transaction state: {0}")]
    InvalidState(String),

    /// A write was attempted through a read-only transaction.
    #[error("read-only transaction attempted a write")]
    ReadOnly,

    /// `create_table` with a name that is already bound.
    #[error("table already exists: {0}")]
    TableExists(String),

    /// Lookup of a table name that is not bound.
    #[error("no such table: {0}")]
    NoSuchTable(String),

    /// Engine configuration rejected at init.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Compact abort classification, used for per-reason counters and for
/// callers that only need the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// See [`Error::WriteConflict`].
    WriteConflict,
    /// See [`Error::Serial`].
    Serial,
    /// See [`Error::ReadValidation`].
    ReadValidation,
    /// See [`Error::Phantom`].
    Phantom,
    /// See [`Error::Internal`].
    Internal,
    /// See [`Error::UserAbort`].
    User,
}

impl AbortReason {
    /// Every reason, in counter order.
    pub const ALL: [AbortReason; 6] = [
        AbortReason::WriteConflict,
        AbortReason::Serial,
        AbortReason::ReadValidation,
        AbortReason::Phantom,
        AbortReason::Internal,
        AbortReason::User,
    ];

    /// Stable label for stats output.
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::WriteConflict => "write_conflict",
            AbortReason::Serial => "serial",
            AbortReason::ReadValidation => "read_validation",
            AbortReason::Phantom => "phantom",
            AbortReason::Internal => "internal",
            AbortReason::User => "user",
        }
    }
}

impl Error {
    /// Whether this error aborts the transaction it occurred in.
    pub fn is_abort(&self) -> bool {
        self.abort_reason().is_some()
    }

    /// The abort classification, if this error is an abort.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Error::WriteConflict { .. } => Some(AbortReason::WriteConflict),
            Error::Serial { .. } => Some(AbortReason::Serial),
            Error::ReadValidation { .. } => Some(AbortReason::ReadValidation),
            Error::Phantom { .. } => Some(AbortReason::Phantom),
            Error::Internal(_) => Some(AbortReason::Internal),
            Error::UserAbort => Some(AbortReason::User),
            _ => None,
        }
    }

    /// Whether retrying the whole transaction may succeed.
    ///
    /// Conflict-class aborts are retryable; state and configuration
    /// errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::WriteConflict { .. }
                | Error::Serial { .. }
                | Error::ReadValidation { .. }
                | Error::Phantom { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_classification() {
        assert_eq!(
            Error::WriteConflict { oid: Oid::new(1) }.abort_reason(),
            Some(AbortReason::WriteConflict)
        );
        assert_eq!(
            Error::Serial {
                hi: Lsn::new(9),
                lo: Lsn::new(3)
            }
            .abort_reason(),
            Some(AbortReason::Serial)
        );
        assert_eq!(Error::UserAbort.abort_reason(), Some(AbortReason::User));
        assert_eq!(Error::ReadOnly.abort_reason(), None);
        assert_eq!(Error::TableExists("t".into()).abort_reason(), None);
    }

    #[test]
    fn retryable_is_conflict_class_only() {
        assert!(Error::Phantom {
            leaf: 1,
            observed: 2,
            current: 3
        }
        .is_retryable());
        assert!(Error::ReadValidation { oid: Oid::new(7) }.is_retryable());
        assert!(!Error::UserAbort.is_retryable());
        assert!(!Error::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn display_carries_context() {
        let msg = Error::Phantom {
            leaf: 4,
            observed: 10,
            current: 12,
        }
        .to_string();
        assert!(msg.contains("leaf 4"));
        assert!(msg.contains("10"));
        assert!(msg.contains("12"));

        let msg = Error::WriteConflict { oid: Oid::new(33) }.to_string();
        assert!(msg.contains("oid:33"));
    }

    #[test]
    fn reason_labels_are_distinct() {
        let mut labels: Vec<_> = AbortReason::ALL.iter().map(|r| r.as_str()).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), AbortReason::ALL.len());
    }
}
