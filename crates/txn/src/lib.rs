//! Transaction core for Cinder
//!
//! This crate owns the transaction lifecycle: XID allocation and the
//! per-transaction context, the read/write/absent sets, version
//! visibility, and the commit protocol with its per-protocol
//! validation paths (SI, SSI, SSN, MVOCC).
//!
//! The data layout is protocol-agnostic — one [`Transaction`] record,
//! one context shape, one version header — and the protocol tag
//! chosen at begin selects which validation function runs at commit.
//! Aborts are results, never unwinds: every operation that can abort
//! returns the abort kind to the caller and leaves the transaction
//! already rolled back.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod registry;
pub mod transaction;
mod validation;

pub use manager::{TxnManager, TxnManagerOptions};
pub use registry::{XidContext, XidRegistry};
pub use transaction::{InsertOutcome, Transaction};
