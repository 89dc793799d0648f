//! Shared redo buffer
//!
//! `RedoLog` holds the generic writer behavior: records are encoded into an
//! in-process buffer and handed to a `RedoSink` according to the requested
//! durability mode:
//!
//! - `NoLog`: nothing is appended
//! - `NoFlush`: appended; the buffer is written out only when full
//! - `NoSync`: appended and written to the sink
//! - `Sync`: appended, written and forced
//!
//! The sink decides where bytes go (a file, a replication stream) and whether
//! each record carries a terminator.

use crate::durability::DurabilityMode;

use super::errors::{RedoError, RedoResult};
use super::op::{encode_store, now_millis, RedoOp};

/// Destination of flushed redo bytes.
pub trait RedoSink: Send {
    /// Writes a flushed buffer. May be called with an empty slice.
    fn write(&mut self, bytes: &[u8]) -> RedoResult<()>;

    /// Terminator appended after `record`, or `None` for streams without
    /// terminators.
    fn terminator(&self, record: &[u8]) -> Option<u32>;

    /// Forces written bytes to stable storage.
    fn force(&mut self, metadata: bool) -> RedoResult<()>;

    /// Whether shutdown and close markers should be written.
    fn is_open(&self) -> bool;
}

/// Redo buffer bound to a sink.
pub struct RedoLog<S: RedoSink> {
    sink: S,
    buffer: Vec<u8>,
    capacity: usize,
    last_txn_id: u64,
    closed: Option<Option<String>>,
}

impl<S: RedoSink> RedoLog<S> {
    pub fn new(sink: S, capacity: usize) -> Self {
        Self {
            sink,
            buffer: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            last_txn_id: 0,
            closed: None,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Bytes appended but not yet written to the sink.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Id of the last transaction committed or reset through this log.
    pub fn last_transaction_id(&self) -> u64 {
        self.last_txn_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Fails with `RedoError::Closed` once `close` has run.
    pub fn ensure_open(&self) -> RedoResult<()> {
        match &self.closed {
            Some(cause) => Err(RedoError::Closed {
                cause: cause.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Appends an auto-commit store. A `None` value records a delete.
    pub fn store(
        &mut self,
        index_id: u64,
        key: &[u8],
        value: Option<&[u8]>,
        mode: DurabilityMode,
    ) -> RedoResult<()> {
        self.ensure_open()?;
        if !mode.writes_log() {
            return Ok(());
        }
        self.append(|out| encode_store(out, index_id, key, value))?;
        self.finish(mode)
    }

    /// Appends a final commit record for `txn_id`.
    ///
    /// Returns true when the caller must follow up with a sync to honor
    /// `Sync` durability; the record has already been written.
    pub fn txn_commit_final(&mut self, txn_id: u64, mode: DurabilityMode) -> RedoResult<bool> {
        self.ensure_open()?;
        if !mode.writes_log() {
            return Ok(false);
        }
        self.append_op(&RedoOp::TxnCommitFinal { txn_id })?;
        self.last_txn_id = txn_id;
        if mode.requires_sync() {
            self.flush()?;
            return Ok(true);
        }
        self.finish(mode)?;
        Ok(false)
    }

    pub fn timestamp(&mut self) -> RedoResult<()> {
        self.ensure_open()?;
        self.append_op(&RedoOp::Timestamp {
            millis: now_millis(),
        })
    }

    /// Appends an end-of-file marker and flushes it.
    pub fn end_file(&mut self) -> RedoResult<()> {
        self.ensure_open()?;
        self.append_op(&RedoOp::EndFile {
            millis: now_millis(),
        })?;
        self.flush().map(|_| ())
    }

    /// Discards buffered bytes and starts a fresh segment with a reset record.
    pub fn clear_and_reset(&mut self, txn_id: u64) -> RedoResult<()> {
        self.ensure_open()?;
        self.buffer.clear();
        self.last_txn_id = txn_id;
        self.append_op(&RedoOp::Reset { txn_id })
    }

    /// Drops buffered bytes that were never written.
    pub fn discard(&mut self) {
        self.buffer.clear();
    }

    /// Writes the buffer to the sink, even when empty. Returns the number of
    /// bytes written. The buffer is kept if the write fails.
    pub fn flush(&mut self) -> RedoResult<usize> {
        self.sink.write(&self.buffer)?;
        let written = self.buffer.len();
        self.buffer.clear();
        Ok(written)
    }

    /// Flushes and forces the log.
    pub fn sync(&mut self, metadata: bool) -> RedoResult<()> {
        self.flush()?;
        self.sink.force(metadata)
    }

    /// Records a clean shutdown and makes everything buffered durable.
    pub fn shutdown(&mut self) -> RedoResult<()> {
        self.ensure_open()?;
        if self.sink.is_open() {
            self.append_op(&RedoOp::Shutdown {
                millis: now_millis(),
            })?;
        }
        self.sync(true)
    }

    /// Closes the log. A close marker is written only if the sink is open.
    /// Closing twice is a no-op.
    pub fn close(&mut self, cause: Option<&str>) -> RedoResult<()> {
        if self.closed.is_some() {
            return Ok(());
        }
        let result = if self.sink.is_open() {
            self.append_op(&RedoOp::Close {
                millis: now_millis(),
            })
            .and_then(|_| self.sync(true))
        } else {
            Ok(())
        };
        self.closed = Some(cause.map(str::to_string));
        result
    }

    fn append_op(&mut self, op: &RedoOp) -> RedoResult<()> {
        self.append(|out| op.encode_into(out))
    }

    fn append(&mut self, encode: impl FnOnce(&mut Vec<u8>)) -> RedoResult<()> {
        let start = self.buffer.len();
        encode(&mut self.buffer);
        if let Some(terminator) = self.sink.terminator(&self.buffer[start..]) {
            self.buffer.extend_from_slice(&terminator.to_le_bytes());
        }
        if self.buffer.len() >= self.capacity {
            self.flush()?;
        }
        Ok(())
    }

    fn finish(&mut self, mode: DurabilityMode) -> RedoResult<()> {
        match mode {
            DurabilityMode::Sync => self.sync(false),
            DurabilityMode::NoSync => self.flush().map(|_| ()),
            DurabilityMode::NoFlush | DurabilityMode::NoLog => Ok(()),
        }
    }
}
