//! Replicated redo writer
//!
//! Redo records go to a `ReplicationManager` instead of a file. The writer
//! is in one of two roles:
//!
//! - Replica (initial): local writes are refused by the transport and fail
//!   with `RedoError::UnmodifiableReplica`.
//! - Leader: records are appended with `NoSync` durability whatever the
//!   caller asked for, then committed through the transport.
//!
//! A refused write or a negative commit position means leadership was lost.
//! The writer flips the transport, becomes a replica and restarts the
//! receive engine on another thread. Role changes, appends and checkpoint
//! snapshots are serialized by one mutex, and the transport commit happens
//! inside it.
//!
//! The replicated stream carries no terminators and never contains shutdown
//! or close records.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::durability::DurabilityMode;
use crate::observability::{log_event_at, log_event_with_fields, DurabilityMetrics, Event, Severity};
use crate::replication::{ReplRedoEngine, ReplicaRole, ReplicationManager, TaskDispatcher};

use super::errors::{RedoError, RedoResult};
use super::log::{RedoLog, RedoSink};
use super::writer::{CommitLock, RedoWriter};

struct ReplSink {
    manager: Arc<dyn ReplicationManager>,
    metrics: Arc<DurabilityMetrics>,
}

impl RedoSink for ReplSink {
    fn write(&mut self, bytes: &[u8]) -> RedoResult<()> {
        // The buffer is flushed even when empty; that must never fail.
        if bytes.is_empty() {
            return Ok(());
        }
        if !self.manager.write(bytes) {
            return Err(RedoError::UnmodifiableReplica);
        }
        self.metrics.add_redo_bytes(bytes.len() as u64);
        Ok(())
    }

    fn terminator(&self, _record: &[u8]) -> Option<u32> {
        None
    }

    fn force(&mut self, _metadata: bool) -> RedoResult<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        false
    }
}

struct ReplState {
    log: RedoLog<ReplSink>,
    role: ReplicaRole,
    checkpoint_pos: i64,
    checkpoint_txn_id: u64,
}

/// Leader/replica aware redo writer.
pub struct ReplRedoWriter {
    engine: Arc<dyn ReplRedoEngine>,
    manager: Arc<dyn ReplicationManager>,
    dispatcher: TaskDispatcher,
    commit_lock: CommitLock,
    state: Mutex<ReplState>,
    metrics: Arc<DurabilityMetrics>,
}

impl ReplRedoWriter {
    /// Creates a writer in the replica role.
    pub fn new(
        engine: Arc<dyn ReplRedoEngine>,
        manager: Arc<dyn ReplicationManager>,
        dispatcher: TaskDispatcher,
        buffer_capacity: usize,
        metrics: Arc<DurabilityMetrics>,
    ) -> Self {
        let sink = ReplSink {
            manager: Arc::clone(&manager),
            metrics: Arc::clone(&metrics),
        };
        Self {
            engine,
            manager,
            dispatcher,
            commit_lock: CommitLock::new(()),
            state: Mutex::new(ReplState {
                log: RedoLog::new(sink, buffer_capacity),
                role: ReplicaRole::Replica,
                checkpoint_pos: 0,
                checkpoint_txn_id: 0,
            }),
            metrics,
        }
    }

    pub fn role(&self) -> ReplicaRole {
        self.state.lock().role
    }

    pub fn is_leader(&self) -> bool {
        self.role().is_leader()
    }

    /// Called when this node became the leader.
    ///
    /// Flips the transport, starts a fresh segment with a reset record
    /// carrying the newest known transaction id, and flushes it. Does nothing
    /// if already leader.
    pub fn leader_notify(&self) -> RedoResult<()> {
        let mut state = self.state.lock();
        let Some(role) = state.role.promoted() else {
            return Ok(());
        };
        state.log.ensure_open()?;

        self.manager.flip();
        state.role = role;

        let txn_id = state
            .log
            .last_transaction_id()
            .max(self.engine.decode_transaction_id());
        if let Err(e) = start_segment(&mut state.log, txn_id) {
            return Err(if e.is_unmodifiable() {
                self.demote_locked(&mut state)
            } else {
                e
            });
        }

        self.metrics.increment_promotions();
        let position = self.manager.position().to_string();
        let txn_id = txn_id.to_string();
        log_event_with_fields(
            Event::RedoLeaderPromoted,
            &[("position", position.as_str()), ("txn_id", txn_id.as_str())],
        );
        Ok(())
    }

    /// Steps down to replica if currently leader. Always returns the
    /// unmodifiable-replica error for the caller to propagate.
    pub fn unmodifiable(&self) -> RedoError {
        let mut state = self.state.lock();
        self.demote_locked(&mut state)
    }

    fn demote_locked(&self, state: &mut ReplState) -> RedoError {
        // Refused bytes are never retried, in either role.
        state.log.discard();

        if let Some(role) = state.role.demoted() {
            self.manager.flip();
            state.role = role;
            self.metrics.increment_demotions();

            let position = self.manager.position().to_string();
            log_event_at(
                Severity::Warn,
                Event::RedoDemoted,
                &[("position", position.as_str())],
            );

            // Never on this thread: the engine may need the writer mutex.
            let engine = Arc::clone(&self.engine);
            self.dispatcher.dispatch(move || engine.start_receiving(0));
        }

        self.metrics.increment_rejections();
        RedoError::UnmodifiableReplica
    }

    /// Appends under the writer mutex and commits through the transport.
    fn append_and_commit(
        &self,
        append: impl FnOnce(&mut RedoLog<ReplSink>) -> RedoResult<()>,
    ) -> RedoResult<()> {
        let mut state = self.state.lock();
        match append(&mut state.log) {
            Ok(()) => {}
            Err(e) if e.is_unmodifiable() => {
                log_event_at(Severity::Warn, Event::RedoWriteRejected, &[("stage", "write")]);
                return Err(self.demote_locked(&mut state));
            }
            Err(e) => return Err(e),
        }

        let position = self.manager.commit();
        if position < 0 {
            log_event_at(Severity::Warn, Event::RedoWriteRejected, &[("stage", "commit")]);
            return Err(self.demote_locked(&mut state));
        }
        self.metrics.increment_commits();
        Ok(())
    }

    fn current_position(&self, state: &ReplState) -> i64 {
        if state.role.is_leader() {
            self.manager.position()
        } else {
            self.engine.decode_position()
        }
    }
}

fn start_segment(log: &mut RedoLog<ReplSink>, txn_id: u64) -> RedoResult<()> {
    log.clear_and_reset(txn_id)?;
    log.flush()?;
    Ok(())
}

impl RedoWriter for ReplRedoWriter {
    fn store_no_lock(
        &self,
        index_id: u64,
        key: &[u8],
        value: Option<&[u8]>,
        mode: DurabilityMode,
    ) -> RedoResult<()> {
        self.append_and_commit(|log| {
            log.store(index_id, key, value, mode.replicated_write_mode())
        })
    }

    fn txn_commit_final(&self, txn_id: u64, mode: DurabilityMode) -> RedoResult<bool> {
        self.append_and_commit(|log| {
            log.txn_commit_final(txn_id, mode.replicated_write_mode())
                .map(|_| ())
        })?;
        Ok(false)
    }

    fn force(&self, _metadata: bool) -> RedoResult<()> {
        Ok(())
    }

    fn force_and_close(&self) -> RedoResult<()> {
        self.force(false)
    }

    fn shutdown(&self) -> RedoResult<()> {
        let mut state = self.state.lock();
        match state.log.shutdown() {
            Err(e) if e.is_unmodifiable() => Err(self.demote_locked(&mut state)),
            other => other,
        }
    }

    fn close(&self, cause: Option<&str>) -> RedoResult<()> {
        let closed = self.state.lock().log.close(cause);
        let forced = self.force_and_close();
        log_event_with_fields(Event::RedoClosed, &[("cause", cause.unwrap_or("none"))]);
        closed.and(forced)
    }

    fn should_checkpoint(&self, size_threshold: u64) -> bool {
        let state = self.state.lock();
        let position = self.current_position(&state);
        let threshold = i64::try_from(size_threshold).unwrap_or(i64::MAX);
        position.saturating_sub(state.checkpoint_pos) >= threshold
    }

    fn checkpoint_prepare(&self) -> RedoResult<()> {
        // Before the commit lock is taken: an engine step may be waiting on it.
        self.engine.suspend();
        Ok(())
    }

    fn checkpoint_switch(&self) -> RedoResult<()> {
        let mut state = self.state.lock();
        let (position, txn_id) = if state.role.is_leader() {
            (self.manager.position(), state.log.last_transaction_id())
        } else {
            (
                self.engine.decode_position(),
                self.engine.decode_transaction_id(),
            )
        };

        if position < state.checkpoint_pos {
            let previous = state.checkpoint_pos.to_string();
            let observed = position.to_string();
            log_event_at(
                Severity::Warn,
                Event::CheckpointPositionRegressed,
                &[("observed", observed.as_str()), ("previous", previous.as_str())],
            );
            return Ok(());
        }

        state.checkpoint_pos = position;
        state.checkpoint_txn_id = txn_id;
        Ok(())
    }

    fn checkpoint_started(&self) -> RedoResult<()> {
        self.engine.resume();
        Ok(())
    }

    fn checkpoint_finished(&self) -> RedoResult<()> {
        Ok(())
    }

    fn checkpoint_position(&self) -> i64 {
        self.state.lock().checkpoint_pos
    }

    fn checkpoint_transaction_id(&self) -> u64 {
        self.state.lock().checkpoint_txn_id
    }

    fn last_transaction_id(&self) -> u64 {
        self.state.lock().log.last_transaction_id()
    }

    fn commit_lock(&self) -> &CommitLock {
        &self.commit_lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redo::{RedoDecoder, RedoOp};
    use crate::replication::MemoryReplicationManager;
    use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingEngine {
        suspends: AtomicUsize,
        resumes: AtomicUsize,
        receiving: AtomicUsize,
        position: AtomicI64,
        txn_id: AtomicU64,
    }

    impl ReplRedoEngine for CountingEngine {
        fn suspend(&self) {
            self.suspends.fetch_add(1, Ordering::SeqCst);
        }
        fn resume(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }
        fn start_receiving(&self, _initial_txn_id: u64) {
            self.receiving.fetch_add(1, Ordering::SeqCst);
        }
        fn decode_position(&self) -> i64 {
            self.position.load(Ordering::SeqCst)
        }
        fn decode_transaction_id(&self) -> u64 {
            self.txn_id.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        _runtime: tokio::runtime::Runtime,
        engine: Arc<CountingEngine>,
        manager: Arc<MemoryReplicationManager>,
        writer: ReplRedoWriter,
    }

    fn fixture() -> Fixture {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let engine = Arc::new(CountingEngine::default());
        let manager = Arc::new(MemoryReplicationManager::new());
        let writer = ReplRedoWriter::new(
            engine.clone(),
            manager.clone(),
            TaskDispatcher::new(runtime.handle().clone()),
            4096,
            Arc::new(DurabilityMetrics::new()),
        );
        Fixture {
            _runtime: runtime,
            engine,
            manager,
            writer,
        }
    }

    fn decode_all(bytes: &[u8]) -> Vec<RedoOp> {
        let mut decoder = RedoDecoder::stream(0, 0);
        decoder.feed(bytes);
        let mut ops = Vec::new();
        while let Some(op) = decoder.next_op().unwrap() {
            ops.push(op);
        }
        ops
    }

    #[test]
    fn test_starts_as_replica() {
        let f = fixture();
        assert_eq!(f.writer.role(), ReplicaRole::Replica);
        assert_eq!(f.manager.flip_count(), 0);
    }

    #[test]
    fn test_leader_notify_writes_reset_segment() {
        let f = fixture();
        f.engine.txn_id.store(12, Ordering::SeqCst);
        f.writer.leader_notify().unwrap();

        assert!(f.writer.is_leader());
        assert_eq!(
            decode_all(&f.manager.stream_from(0)),
            vec![RedoOp::Reset { txn_id: 12 }]
        );
        assert_eq!(f.writer.last_transaction_id(), 12);
    }

    #[test]
    fn test_stronger_modes_are_written_without_sync() {
        let f = fixture();
        f.writer.leader_notify().unwrap();
        f.writer
            .store(1, b"k", Some(b"v"), DurabilityMode::NoLog)
            .unwrap();
        {
            let _shared = f.writer.commit_lock().read();
            assert!(!f.writer.txn_commit_final(5, DurabilityMode::Sync).unwrap());
        }

        let ops = decode_all(&f.manager.stream_from(0));
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[2], RedoOp::TxnCommitFinal { txn_id: 5 });
        assert_eq!(f.manager.committed_position(), f.manager.position());
    }

    #[test]
    fn test_replica_store_is_unmodifiable() {
        let f = fixture();
        let err = f
            .writer
            .store(1, b"k", None, DurabilityMode::Sync)
            .unwrap_err();
        assert!(err.is_unmodifiable());
        // No transition happened, so no flip and no receive restart.
        assert_eq!(f.manager.flip_count(), 0);
        assert_eq!(f.writer.role(), ReplicaRole::Replica);
    }

    #[test]
    fn test_rejected_replica_stores_leave_nothing_buffered() {
        let f = fixture();
        for i in 0..100u64 {
            let err = f
                .writer
                .store(1, &i.to_le_bytes(), Some(b"value"), DurabilityMode::Sync)
                .unwrap_err();
            assert!(err.is_unmodifiable());
        }
        assert_eq!(f.writer.state.lock().log.buffered(), 0);
        assert!(f.writer.shutdown().is_ok());
    }

    #[test]
    fn test_rejected_buffered_store_is_discarded() {
        let f = fixture();
        assert!(f
            .writer
            .store(1, b"k", Some(b"v"), DurabilityMode::NoFlush)
            .is_err());
        assert_eq!(f.writer.state.lock().log.buffered(), 0);
    }

    #[test]
    fn test_leader_notify_after_close_keeps_replica_role() {
        let f = fixture();
        f.writer.close(None).unwrap();

        let err = f.writer.leader_notify().unwrap_err();
        assert_eq!(err.code(), "REDO_CLOSED");
        assert_eq!(f.writer.role(), ReplicaRole::Replica);
        assert_eq!(f.manager.flip_count(), 0);
        assert!(!f.manager.is_sending());
    }

    #[test]
    fn test_shutdown_and_close_write_no_markers() {
        let f = fixture();
        f.writer.leader_notify().unwrap();
        let before = f.manager.stream_from(0);

        f.writer.shutdown().unwrap();
        f.writer.close(Some("done")).unwrap();
        assert_eq!(f.manager.stream_from(0), before);

        let err = f
            .writer
            .store(1, b"k", None, DurabilityMode::NoSync)
            .unwrap_err();
        assert_eq!(err.code(), "REDO_CLOSED");
    }

    #[test]
    fn test_force_is_noop_in_both_roles() {
        let f = fixture();
        assert!(f.writer.force(true).is_ok());
        assert!(f.writer.force_and_close().is_ok());
        assert!(f.writer.txn_commit_sync().is_ok());
        f.writer.leader_notify().unwrap();
        assert!(f.writer.force(false).is_ok());
        assert!(f.writer.txn_commit_sync().is_ok());
    }

    #[test]
    fn test_replica_checkpoint_uses_decode_cursor() {
        let f = fixture();
        f.engine.position.store(500, Ordering::SeqCst);
        f.engine.txn_id.store(9, Ordering::SeqCst);

        assert!(f.writer.should_checkpoint(500));
        assert!(!f.writer.should_checkpoint(501));

        f.writer.checkpoint_switch().unwrap();
        assert_eq!(f.writer.checkpoint_position(), 500);
        assert_eq!(f.writer.checkpoint_transaction_id(), 9);
        assert!(!f.writer.should_checkpoint(1));
        assert!(f.writer.should_checkpoint(0));
    }

    #[test]
    fn test_checkpoint_position_never_moves_backwards() {
        let f = fixture();
        f.engine.position.store(800, Ordering::SeqCst);
        f.engine.txn_id.store(4, Ordering::SeqCst);
        f.writer.checkpoint_switch().unwrap();

        f.engine.position.store(300, Ordering::SeqCst);
        f.engine.txn_id.store(2, Ordering::SeqCst);
        f.writer.checkpoint_switch().unwrap();

        assert_eq!(f.writer.checkpoint_position(), 800);
        assert_eq!(f.writer.checkpoint_transaction_id(), 4);
    }

    #[test]
    fn test_prepare_and_started_drive_engine() {
        let f = fixture();
        f.writer.checkpoint_prepare().unwrap();
        assert_eq!(f.engine.suspends.load(Ordering::SeqCst), 1);
        assert_eq!(f.engine.resumes.load(Ordering::SeqCst), 0);
        f.writer.checkpoint_started().unwrap();
        f.writer.checkpoint_finished().unwrap();
        assert_eq!(f.engine.resumes.load(Ordering::SeqCst), 1);
    }
}
