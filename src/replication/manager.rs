//! Replication transport contract
//!
//! The writer talks to the replication layer through `ReplicationManager`.
//! Positions are byte offsets in the replicated stream; a negative commit
//! position means this node is no longer allowed to originate writes.

use parking_lot::Mutex;

/// Transport used by the replicated redo writer.
pub trait ReplicationManager: Send + Sync {
    /// Commits everything written so far. Returns the commit position, or a
    /// negative value if the commit was refused.
    fn commit(&self) -> i64;

    /// Current position of the replicated stream.
    fn position(&self) -> i64;

    /// Appends bytes to the stream. Returns false if refused.
    fn write(&self, bytes: &[u8]) -> bool;

    /// Switches the transport between sending and receiving.
    fn flip(&self);
}

#[derive(Debug)]
struct LoopbackState {
    base: i64,
    stream: Vec<u8>,
    sending: bool,
    revoked: bool,
    committed: i64,
    flips: usize,
    writes: usize,
}

/// In-memory loopback transport.
///
/// Accepts writes only while flipped into sending mode and not revoked. The
/// written stream can be read back to feed a replica.
#[derive(Debug)]
pub struct MemoryReplicationManager {
    state: Mutex<LoopbackState>,
}

impl MemoryReplicationManager {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Transport whose stream begins at `position`.
    pub fn starting_at(position: i64) -> Self {
        Self {
            state: Mutex::new(LoopbackState {
                base: position,
                stream: Vec::new(),
                sending: false,
                revoked: false,
                committed: position,
                flips: 0,
                writes: 0,
            }),
        }
    }

    /// Simulates losing leadership: later writes and commits are refused.
    pub fn revoke_leadership(&self) {
        self.state.lock().revoked = true;
    }

    /// Lifts a previous revocation.
    pub fn restore_leadership(&self) {
        self.state.lock().revoked = false;
    }

    pub fn is_sending(&self) -> bool {
        self.state.lock().sending
    }

    pub fn flip_count(&self) -> usize {
        self.state.lock().flips
    }

    /// Number of `write` calls that reached the transport.
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn committed_position(&self) -> i64 {
        self.state.lock().committed
    }

    /// Stream bytes from `position` onwards.
    pub fn stream_from(&self, position: i64) -> Vec<u8> {
        let state = self.state.lock();
        let start = usize::try_from(position - state.base).unwrap_or(0);
        state.stream.get(start..).map(<[u8]>::to_vec).unwrap_or_default()
    }
}

impl Default for MemoryReplicationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicationManager for MemoryReplicationManager {
    fn commit(&self) -> i64 {
        let mut state = self.state.lock();
        if !state.sending || state.revoked {
            return -1;
        }
        state.committed = state.base + state.stream.len() as i64;
        state.committed
    }

    fn position(&self) -> i64 {
        let state = self.state.lock();
        state.base + state.stream.len() as i64
    }

    fn write(&self, bytes: &[u8]) -> bool {
        let mut state = self.state.lock();
        state.writes += 1;
        if !state.sending || state.revoked {
            return false;
        }
        state.stream.extend_from_slice(bytes);
        true
    }

    fn flip(&self) {
        let mut state = self.state.lock();
        state.sending = !state.sending;
        state.flips += 1;
    }
}
