//! Log records and frame encoding
//!
//! Each record is framed as `[len: u32][crc32: u32][bincode body]`,
//! big-endian framing fields. The checksum covers the body only; a
//! mismatch on decode is surfaced as corruption.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use cinder_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// One logical record in a transaction's log batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    /// Catalog entry written when a table is created.
    CreateTable {
        /// Table name.
        name: String,
        /// Wall-clock at creation, microseconds since epoch.
        timestamp_micros: u64,
    },

    /// First version of a new record.
    Insert {
        /// The allocated OID.
        oid: u64,
        /// The index key the OID was bound to.
        key: Vec<u8>,
        /// The initial payload.
        value: Vec<u8>,
    },

    /// A new version on an existing chain. `None` is a deletion
    /// tombstone.
    Update {
        /// The mutated record.
        oid: u64,
        /// The new payload, or `None` for a delete.
        value: Option<Vec<u8>>,
    },

    /// Terminator of a transaction's batch; carries the owner and
    /// the moment the batch was published.
    Commit {
        /// Packed XID of the committing transaction.
        xid: u64,
        /// Wall-clock at commit, microseconds since epoch.
        timestamp_micros: u64,
    },
}

impl LogRecord {
    /// Whether this record terminates a batch.
    pub fn is_commit(&self) -> bool {
        matches!(self, LogRecord::Commit { .. })
    }
}

/// Encode one record into its frame.
pub fn encode_frame(record: &LogRecord) -> Result<Vec<u8>> {
    let body =
        bincode::serialize(record).map_err(|e| Error::Internal(format!("log encode: {}", e)))?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&body);
    let crc = hasher.finalize();

    let mut frame = Vec::with_capacity(body.len() + 8);
    frame
        .write_u32::<BigEndian>(body.len() as u32)
        .expect("vec write");
    frame.write_u32::<BigEndian>(crc).expect("vec write");
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a run of frames back into records, verifying checksums.
pub fn decode_frames(mut bytes: &[u8]) -> Result<Vec<LogRecord>> {
    let mut records = Vec::new();
    while !bytes.is_empty() {
        let len = bytes
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Internal(format!("log frame header: {}", e)))?
            as usize;
        let crc = bytes
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Internal(format!("log frame header: {}", e)))?;
        if bytes.len() < len {
            return Err(Error::Internal("truncated log frame".to_string()));
        }
        let (body, rest) = bytes.split_at(len);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(body);
        if hasher.finalize() != crc {
            return Err(Error::Internal("log frame checksum mismatch".to_string()));
        }
        let record = bincode::deserialize(body)
            .map_err(|e| Error::Internal(format!("log decode: {}", e)))?;
        records.push(record);
        bytes = rest;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_roundtrip() {
        let records = vec![
            LogRecord::CreateTable {
                name: "accounts".to_string(),
                timestamp_micros: 1,
            },
            LogRecord::Insert {
                oid: 7,
                key: b"k".to_vec(),
                value: b"v".to_vec(),
            },
            LogRecord::Update {
                oid: 7,
                value: None,
            },
            LogRecord::Commit {
                xid: 99,
                timestamp_micros: 2,
            },
        ];
        let mut bytes = Vec::new();
        for record in &records {
            bytes.extend(encode_frame(record).unwrap());
        }
        let decoded = decode_frames(&bytes).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn checksum_mismatch_is_corruption() {
        let mut bytes = encode_frame(&LogRecord::Commit {
            xid: 1,
            timestamp_micros: 0,
        })
        .unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(decode_frames(&bytes).is_err());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let bytes = encode_frame(&LogRecord::Update {
            oid: 3,
            value: Some(b"x".to_vec()),
        })
        .unwrap();
        assert!(decode_frames(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn commit_classification() {
        assert!(LogRecord::Commit {
            xid: 0,
            timestamp_micros: 0
        }
        .is_commit());
        assert!(!LogRecord::Update {
            oid: 0,
            value: None
        }
        .is_commit());
    }
}
