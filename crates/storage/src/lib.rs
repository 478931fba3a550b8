//! Shared storage for Cinder
//!
//! This crate owns the three process-wide structures every
//! transaction touches:
//! - [`EpochManager`]: quiescent-state reclamation. Threads bracket
//!   any access to versioned memory with an [`EpochGuard`]; freed
//!   slots are held until every registered worker has quiesced past
//!   the reclamation epoch.
//! - [`OidTable`]: grow-only indirection table mapping an OID to the
//!   head of its version chain. Heads are single words mutated only
//!   by CAS.
//! - [`VersionStore`]: arena of version records addressed by
//!   [`VersionPtr`]. A version is payload + back link + one stamp
//!   word; its storage is recycled through the epoch system.
//!
//! None of these are engine-global singletons; the engine constructs
//! them once and threads references through every operation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod epoch;
pub mod oid;
pub mod version;
pub mod worker;

pub use epoch::{EpochGuard, EpochManager};
pub use oid::OidTable;
pub use version::{VersionPtr, VersionStore};
pub use worker::{WorkerId, WorkerRegistry};
