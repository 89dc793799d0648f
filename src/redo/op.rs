//! Redo record encoding
//!
//! Record layout (all integers little-endian):
//!
//! ```text
//! | opcode (1) | body ... |
//!
//! RESET              | txn_id u64 |
//! TIMESTAMP          | millis u64 |
//! SHUTDOWN           | millis u64 |
//! CLOSE              | millis u64 |
//! END_FILE           | millis u64 |
//! TXN_COMMIT_FINAL   | txn_id u64 |
//! STORE              | index_id u64 | key_len u32 | key | value_len u32 | value |
//! ```
//!
//! A `value_len` of `u32::MAX` encodes a delete (no value bytes follow).

use std::fmt;

use chrono::Utc;

const OP_RESET: u8 = 1;
const OP_TIMESTAMP: u8 = 2;
const OP_SHUTDOWN: u8 = 3;
const OP_CLOSE: u8 = 4;
const OP_END_FILE: u8 = 5;
const OP_TXN_COMMIT_FINAL: u8 = 6;
const OP_STORE: u8 = 7;

const DELETE_MARKER: u32 = u32::MAX;

/// A decoded redo operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedoOp {
    /// Start of a fresh log segment. Decoders reset their transaction id.
    Reset { txn_id: u64 },
    Timestamp { millis: u64 },
    /// Clean shutdown marker.
    Shutdown { millis: u64 },
    /// Writer closed marker.
    Close { millis: u64 },
    /// Last record of a redo file.
    EndFile { millis: u64 },
    /// Final commit of a transaction.
    TxnCommitFinal { txn_id: u64 },
    /// Auto-commit store. A missing value is a delete.
    Store {
        index_id: u64,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    },
}

/// Reason a record could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    UnknownOpcode(u8),
    /// A length prefix exceeds what a record may hold.
    BadLength(u32),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownOpcode(op) => write!(f, "unknown opcode {}", op),
            DecodeError::BadLength(len) => write!(f, "bad length prefix {}", len),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

pub(crate) fn encode_store(out: &mut Vec<u8>, index_id: u64, key: &[u8], value: Option<&[u8]>) {
    out.push(OP_STORE);
    out.extend_from_slice(&index_id.to_le_bytes());
    out.extend_from_slice(&(key.len() as u32).to_le_bytes());
    out.extend_from_slice(key);
    match value {
        Some(value) => {
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            out.extend_from_slice(value);
        }
        None => out.extend_from_slice(&DELETE_MARKER.to_le_bytes()),
    }
}

fn encode_u64_op(out: &mut Vec<u8>, opcode: u8, value: u64) {
    out.push(opcode);
    out.extend_from_slice(&value.to_le_bytes());
}

impl RedoOp {
    /// Appends the encoded record to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            RedoOp::Reset { txn_id } => encode_u64_op(out, OP_RESET, *txn_id),
            RedoOp::Timestamp { millis } => encode_u64_op(out, OP_TIMESTAMP, *millis),
            RedoOp::Shutdown { millis } => encode_u64_op(out, OP_SHUTDOWN, *millis),
            RedoOp::Close { millis } => encode_u64_op(out, OP_CLOSE, *millis),
            RedoOp::EndFile { millis } => encode_u64_op(out, OP_END_FILE, *millis),
            RedoOp::TxnCommitFinal { txn_id } => {
                encode_u64_op(out, OP_TXN_COMMIT_FINAL, *txn_id)
            }
            RedoOp::Store {
                index_id,
                key,
                value,
            } => encode_store(out, *index_id, key, value.as_deref()),
        }
    }

    /// Decodes one record from the front of `bytes`.
    ///
    /// Returns `Ok(None)` when `bytes` holds only part of a record.
    pub fn decode(bytes: &[u8]) -> Result<Option<(RedoOp, usize)>, DecodeError> {
        let Some(&opcode) = bytes.first() else {
            return Ok(None);
        };
        let body = &bytes[1..];

        let simple = |make: fn(u64) -> RedoOp| -> Result<Option<(RedoOp, usize)>, DecodeError> {
            Ok(read_u64(body, 0).map(|v| (make(v), 9)))
        };

        match opcode {
            OP_RESET => simple(|txn_id| RedoOp::Reset { txn_id }),
            OP_TIMESTAMP => simple(|millis| RedoOp::Timestamp { millis }),
            OP_SHUTDOWN => simple(|millis| RedoOp::Shutdown { millis }),
            OP_CLOSE => simple(|millis| RedoOp::Close { millis }),
            OP_END_FILE => simple(|millis| RedoOp::EndFile { millis }),
            OP_TXN_COMMIT_FINAL => simple(|txn_id| RedoOp::TxnCommitFinal { txn_id }),
            OP_STORE => decode_store(body),
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }

    /// Transaction id carried by the record, if any.
    pub fn txn_id(&self) -> Option<u64> {
        match self {
            RedoOp::Reset { txn_id } | RedoOp::TxnCommitFinal { txn_id } => Some(*txn_id),
            _ => None,
        }
    }
}

fn decode_store(body: &[u8]) -> Result<Option<(RedoOp, usize)>, DecodeError> {
    let Some(index_id) = read_u64(body, 0) else {
        return Ok(None);
    };
    let Some(key_len) = read_u32(body, 8) else {
        return Ok(None);
    };
    if key_len == DELETE_MARKER {
        return Err(DecodeError::BadLength(key_len));
    }
    let key_start = 12;
    let key_end = key_start + key_len as usize;
    let Some(key) = body.get(key_start..key_end) else {
        return Ok(None);
    };
    let Some(value_len) = read_u32(body, key_end) else {
        return Ok(None);
    };
    let value_start = key_end + 4;
    let (value, end) = if value_len == DELETE_MARKER {
        (None, value_start)
    } else {
        let value_end = value_start + value_len as usize;
        match body.get(value_start..value_end) {
            Some(value) => (Some(value.to_vec()), value_end),
            None => return Ok(None),
        }
    };

    let op = RedoOp::Store {
        index_id,
        key: key.to_vec(),
        value,
    };
    Ok(Some((op, 1 + end)))
}

fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let raw: [u8; 8] = bytes.get(at..at + 8)?.try_into().ok()?;
    Some(u64::from_le_bytes(raw))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(raw))
}
