//! Replica receive side
//!
//! `ReplRedoEngine` is what the replicated writer needs from the component
//! applying the leader's stream: pause it around a checkpoint switch, restart
//! it after a demotion, and read how far it has decoded.
//!
//! `ReceivingEngine` is the in-process implementation: it decodes fed bytes
//! with a `RedoDecoder`, hands each record to an applier and publishes the
//! decode cursor.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::observability::{log_event_with_fields, Event, Logger};
use crate::redo::{RedoDecoder, RedoResult, RedoVisitor};

/// Receive-side contract used by the replicated writer.
pub trait ReplRedoEngine: Send + Sync {
    /// Waits for in-flight decode work and blocks new work until `resume`.
    fn suspend(&self);

    fn resume(&self);

    /// Starts receiving if not already. A reset record is expected first, so
    /// the initial transaction id may be zero.
    fn start_receiving(&self, initial_txn_id: u64);

    /// Stream position just past the last applied record.
    fn decode_position(&self) -> i64;

    /// Transaction id of the last applied reset or commit record.
    fn decode_transaction_id(&self) -> u64;
}

/// Decode position and transaction id, published for checkpoint decisions.
#[derive(Debug, Default)]
pub struct DecodeCursor {
    position: AtomicI64,
    txn_id: AtomicU64,
}

impl DecodeCursor {
    pub fn new(position: i64, txn_id: u64) -> Self {
        Self {
            position: AtomicI64::new(position),
            txn_id: AtomicU64::new(txn_id),
        }
    }

    pub fn position(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn transaction_id(&self) -> u64 {
        self.txn_id.load(Ordering::Acquire)
    }

    pub fn advance(&self, position: i64, txn_id: u64) {
        self.txn_id.store(txn_id, Ordering::Release);
        self.position.store(position, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct LatchState {
    suspended: usize,
    active: usize,
}

/// Suspend/resume gate around decode steps.
///
/// Suspensions nest: each `suspend` needs a matching `resume`.
#[derive(Debug, Default)]
pub struct SuspendLatch {
    state: Mutex<LatchState>,
    changed: Condvar,
}

impl SuspendLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks new steps, then waits for running steps to finish.
    pub fn suspend(&self) {
        let mut state = self.state.lock();
        state.suspended += 1;
        while state.active > 0 {
            self.changed.wait(&mut state);
        }
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        state.suspended = state.suspended.saturating_sub(1);
        self.changed.notify_all();
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended > 0
    }

    /// Enters a decode step, waiting while suspended.
    pub fn enter(&self) -> LatchGuard<'_> {
        let mut state = self.state.lock();
        while state.suspended > 0 {
            self.changed.wait(&mut state);
        }
        state.active += 1;
        LatchGuard { latch: self }
    }
}

/// Marks one running decode step.
pub struct LatchGuard<'a> {
    latch: &'a SuspendLatch,
}

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.latch.state.lock();
        state.active -= 1;
        self.latch.changed.notify_all();
    }
}

struct ReceiveState {
    decoder: Option<RedoDecoder>,
    applier: Box<dyn RedoVisitor + Send>,
}

/// Decoder-driven replica engine.
pub struct ReceivingEngine {
    cursor: DecodeCursor,
    latch: SuspendLatch,
    state: Mutex<ReceiveState>,
}

impl ReceivingEngine {
    /// Engine applying records through `applier`, positioned at `position`.
    pub fn new(position: i64, applier: impl RedoVisitor + Send + 'static) -> Self {
        Self {
            cursor: DecodeCursor::new(position, 0),
            latch: SuspendLatch::new(),
            state: Mutex::new(ReceiveState {
                decoder: None,
                applier: Box::new(applier),
            }),
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.state.lock().decoder.is_some()
    }

    pub fn is_suspended(&self) -> bool {
        self.latch.is_suspended()
    }

    /// Stops receiving, typically after this node became leader. Undecoded
    /// bytes are dropped.
    pub fn stop_receiving(&self) {
        self.state.lock().decoder = None;
    }

    /// Decodes and applies `bytes` from the leader's stream. Returns the
    /// number of records applied. Bytes arriving while not receiving are
    /// ignored.
    pub fn receive(&self, bytes: &[u8]) -> RedoResult<usize> {
        let _step = self.latch.enter();
        let mut guard = self.state.lock();
        let ReceiveState { decoder, applier } = &mut *guard;
        let Some(decoder) = decoder.as_mut() else {
            return Ok(0);
        };

        decoder.feed(bytes);
        let mut applied = 0;
        let result = loop {
            match decoder.next_op() {
                Ok(Some(op)) => {
                    if let Err(e) = applier.visit(op) {
                        break Err(e);
                    }
                    applied += 1;
                    self.cursor
                        .advance(decoder.position() as i64, decoder.transaction_id());
                }
                Ok(None) => break Ok(applied),
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = &result {
            let error = e.to_string();
            let position = decoder.position().to_string();
            Logger::error(
                Event::ReceiveFailed.as_str(),
                &[("error", error.as_str()), ("position", position.as_str())],
            );
        }
        result
    }
}

impl ReplRedoEngine for ReceivingEngine {
    fn suspend(&self) {
        self.latch.suspend();
    }

    fn resume(&self) {
        self.latch.resume();
    }

    fn start_receiving(&self, initial_txn_id: u64) {
        let mut state = self.state.lock();
        if state.decoder.is_some() {
            return;
        }
        let position = self.cursor.position();
        state.decoder = Some(RedoDecoder::stream(
            u64::try_from(position).unwrap_or(0),
            initial_txn_id,
        ));
        self.cursor.advance(position, initial_txn_id);
        let position = position.to_string();
        log_event_with_fields(Event::ReceiveStart, &[("position", position.as_str())]);
    }

    fn decode_position(&self) -> i64 {
        self.cursor.position()
    }

    fn decode_transaction_id(&self) -> u64 {
        self.cursor.transaction_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redo::RedoOp;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn encoded(ops: &[RedoOp]) -> Vec<u8> {
        let mut out = Vec::new();
        for op in ops {
            op.encode_into(&mut out);
        }
        out
    }

    fn collecting_engine(position: i64) -> (ReceivingEngine, Arc<Mutex<Vec<RedoOp>>>) {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&applied);
        let engine = ReceivingEngine::new(position, move |op: RedoOp| -> RedoResult<()> {
            sink.lock().push(op);
            Ok(())
        });
        (engine, applied)
    }

    #[test]
    fn test_ignores_bytes_until_receiving() {
        let (engine, applied) = collecting_engine(0);
        let bytes = encoded(&[RedoOp::Reset { txn_id: 1 }]);
        assert_eq!(engine.receive(&bytes).unwrap(), 0);
        assert!(applied.lock().is_empty());
        assert_eq!(engine.decode_position(), 0);
    }

    #[test]
    fn test_receive_advances_cursor() {
        let (engine, applied) = collecting_engine(50);
        engine.start_receiving(0);
        let bytes = encoded(&[
            RedoOp::Reset { txn_id: 7 },
            RedoOp::TxnCommitFinal { txn_id: 8 },
        ]);

        assert_eq!(engine.receive(&bytes[..12]).unwrap(), 1);
        assert_eq!(engine.decode_position(), 59);
        assert_eq!(engine.decode_transaction_id(), 7);

        assert_eq!(engine.receive(&bytes[12..]).unwrap(), 1);
        assert_eq!(engine.decode_position(), 68);
        assert_eq!(engine.decode_transaction_id(), 8);
        assert_eq!(applied.lock().len(), 2);
    }

    #[test]
    fn test_start_receiving_is_idempotent() {
        let (engine, _) = collecting_engine(0);
        engine.start_receiving(3);
        engine.receive(&encoded(&[RedoOp::TxnCommitFinal { txn_id: 4 }]))
            .unwrap();
        engine.start_receiving(0);
        assert_eq!(engine.decode_transaction_id(), 4);
        assert!(engine.is_receiving());

        engine.stop_receiving();
        assert!(!engine.is_receiving());
    }

    #[test]
    fn test_suspend_blocks_receive_until_resume() {
        let (engine, applied) = collecting_engine(0);
        let engine = Arc::new(engine);
        engine.start_receiving(0);
        engine.suspend();
        assert!(engine.is_suspended());

        let receiver = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                engine
                    .receive(&encoded(&[RedoOp::Reset { txn_id: 1 }]))
                    .unwrap()
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(applied.lock().is_empty());

        engine.resume();
        assert_eq!(receiver.join().unwrap(), 1);
        assert_eq!(applied.lock().len(), 1);
    }

    #[test]
    fn test_latch_waits_for_active_step() {
        let latch = Arc::new(SuspendLatch::new());
        let step = latch.enter();

        let suspender = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || latch.suspend())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!suspender.is_finished());

        drop(step);
        suspender.join().unwrap();
        assert!(latch.is_suspended());
        latch.resume();
        assert!(!latch.is_suspended());
    }
}
