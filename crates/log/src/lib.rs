//! Commit log for Cinder
//!
//! The engine consumes the log through a deliberately small contract:
//! `new_txn_log()` hands a transaction a private handle, `append`
//! buffers records on that handle, and `commit` atomically publishes
//! the batch and yields the end LSN. The LSN clock is the only piece
//! of ordering the log leaks to the rest of the engine; commit
//! records are appended and stamped under one lock so LSN order and
//! buffer order never disagree.
//!
//! The buffer is in-memory and segmented. Writing segments to disk,
//! checkpointing, and recovery are the concern of whatever sits
//! behind the buffer, not of this crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod manager;
mod record;

pub use manager::{LogManager, TxnLog};
pub use record::{decode_frames, encode_frame, LogRecord};

/// Microseconds since the Unix epoch, for record timestamps.
pub fn now_micros() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}
