//! Redo decoding
//!
//! The decoder is fed raw bytes (a whole file during recovery, or chunks of a
//! replication stream) and yields complete records. A trailing partial record
//! is left buffered until more bytes arrive; at end of file it is a torn tail
//! and is ignored.

use std::fs;
use std::io;
use std::path::Path;

use super::errors::{RedoError, RedoResult};
use super::op::RedoOp;

const TERMINATOR_LEN: usize = 4;

/// Checksum stored after each record of a file log.
pub(crate) fn record_checksum(record: &[u8]) -> u32 {
    crc32fast::hash(record)
}

/// Receives decoded records.
pub trait RedoVisitor {
    fn visit(&mut self, op: RedoOp) -> RedoResult<()>;
}

impl<F> RedoVisitor for F
where
    F: FnMut(RedoOp) -> RedoResult<()>,
{
    fn visit(&mut self, op: RedoOp) -> RedoResult<()> {
        self(op)
    }
}

/// Incremental redo decoder.
pub struct RedoDecoder {
    buffer: Vec<u8>,
    consumed: usize,
    position: u64,
    terminators: bool,
    txn_id: u64,
}

impl RedoDecoder {
    /// Decoder for a replication stream, which carries no terminators.
    pub fn stream(position: u64, txn_id: u64) -> Self {
        Self::new(false, position, txn_id)
    }

    /// Decoder for a file log, where every record is followed by a checksum.
    pub fn file() -> Self {
        Self::new(true, 0, 0)
    }

    fn new(terminators: bool, position: u64, txn_id: u64) -> Self {
        Self {
            buffer: Vec::new(),
            consumed: 0,
            position,
            terminators,
            txn_id,
        }
    }

    /// Offset just past the last decoded record.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Transaction id carried by the most recent reset or commit record.
    pub fn transaction_id(&self) -> u64 {
        self.txn_id
    }

    /// Bytes received but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.consumed
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        if self.consumed > 0 {
            self.buffer.drain(..self.consumed);
            self.consumed = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Decodes the next complete record, or returns `None` if more bytes are
    /// needed.
    pub fn next_op(&mut self) -> RedoResult<Option<RedoOp>> {
        let available = &self.buffer[self.consumed..];
        let (op, used) = match RedoOp::decode(available) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return Ok(None),
            Err(e) => return Err(RedoError::corrupt(self.position, e.to_string())),
        };

        let mut total = used;
        if self.terminators {
            let Some(raw) = available.get(used..used + TERMINATOR_LEN) else {
                return Ok(None);
            };
            let mut stored = [0u8; TERMINATOR_LEN];
            stored.copy_from_slice(raw);
            if u32::from_le_bytes(stored) != record_checksum(&available[..used]) {
                return Err(RedoError::corrupt(self.position, "checksum mismatch"));
            }
            total += TERMINATOR_LEN;
        }

        self.consumed += total;
        self.position += total as u64;
        if let Some(txn_id) = op.txn_id() {
            self.txn_id = txn_id;
        }
        Ok(Some(op))
    }

    /// Decodes every complete record into `visitor`. Returns how many were
    /// visited.
    pub fn run(&mut self, visitor: &mut dyn RedoVisitor) -> RedoResult<usize> {
        let mut count = 0;
        while let Some(op) = self.next_op()? {
            visitor.visit(op)?;
            count += 1;
        }
        Ok(count)
    }
}

/// Decoded contents of one redo file.
#[derive(Debug, Default)]
pub struct LogFileContents {
    pub ops: Vec<RedoOp>,
    /// Bytes of a trailing partial record, if the file ends mid-record.
    pub torn_bytes: usize,
    pub last_txn_id: u64,
}

/// Reads and decodes a complete file log.
pub fn read_log_file(path: &Path) -> RedoResult<LogFileContents> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LogFileContents::default()),
        Err(e) => {
            return Err(RedoError::io(
                format!("failed to read redo file {}", path.display()),
                e,
            ))
        }
    };

    let mut decoder = RedoDecoder::file();
    decoder.feed(&bytes);
    let mut ops = Vec::new();
    decoder.run(&mut |op: RedoOp| -> RedoResult<()> {
        ops.push(op);
        Ok(())
    })?;

    Ok(LogFileContents {
        ops,
        torn_bytes: decoder.pending(),
        last_txn_id: decoder.transaction_id(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(ops: &[RedoOp]) -> Vec<u8> {
        let mut out = Vec::new();
        for op in ops {
            let start = out.len();
            op.encode_into(&mut out);
            let crc = record_checksum(&out[start..]);
            out.extend_from_slice(&crc.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_stream_decoding_across_chunks() {
        let mut bytes = Vec::new();
        RedoOp::Reset { txn_id: 10 }.encode_into(&mut bytes);
        RedoOp::TxnCommitFinal { txn_id: 11 }.encode_into(&mut bytes);

        let mut decoder = RedoDecoder::stream(100, 0);
        decoder.feed(&bytes[..5]);
        assert_eq!(decoder.next_op().unwrap(), None);

        decoder.feed(&bytes[5..]);
        assert_eq!(
            decoder.next_op().unwrap(),
            Some(RedoOp::Reset { txn_id: 10 })
        );
        assert_eq!(decoder.position(), 109);
        assert_eq!(
            decoder.next_op().unwrap(),
            Some(RedoOp::TxnCommitFinal { txn_id: 11 })
        );
        assert_eq!(decoder.position(), 118);
        assert_eq!(decoder.transaction_id(), 11);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_file_decoding_verifies_checksum() {
        let mut bytes = framed(&[RedoOp::TxnCommitFinal { txn_id: 3 }]);
        let mut decoder = RedoDecoder::file();
        decoder.feed(&bytes);
        assert!(decoder.next_op().unwrap().is_some());

        bytes[3] ^= 0xFF;
        let mut decoder = RedoDecoder::file();
        decoder.feed(&bytes);
        let err = decoder.next_op().unwrap_err();
        assert_eq!(err.code(), "REDO_CORRUPTION");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_terminator_is_torn_tail() {
        let bytes = framed(&[RedoOp::Timestamp { millis: 1 }]);
        let mut decoder = RedoDecoder::file();
        decoder.feed(&bytes[..bytes.len() - 2]);
        assert_eq!(decoder.next_op().unwrap(), None);
        assert_eq!(decoder.pending(), bytes.len() - 2);
    }

    #[test]
    fn test_run_visits_all_records() {
        let bytes = framed(&[
            RedoOp::Reset { txn_id: 1 },
            RedoOp::Store {
                index_id: 2,
                key: b"a".to_vec(),
                value: None,
            },
            RedoOp::TxnCommitFinal { txn_id: 2 },
        ]);
        let mut decoder = RedoDecoder::file();
        decoder.feed(&bytes);

        let mut seen = Vec::new();
        let count = decoder
            .run(&mut |op: RedoOp| -> RedoResult<()> {
                seen.push(op);
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(seen.len(), 3);
        assert_eq!(decoder.position(), bytes.len() as u64);
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let contents = read_log_file(&dir.path().join("redo.9")).unwrap();
        assert!(contents.ops.is_empty());
        assert_eq!(contents.torn_bytes, 0);
    }
}
