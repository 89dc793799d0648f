//! Exclusive locks
//!
//! A `Lock` is one exclusive hold on a key of an index. It is owned by one
//! `LockOwner` at a time and released only through a `LockManager`.
//! `LockTable` is the in-memory manager: no waiting, no deadlock detection;
//! a conflicting request fails immediately.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use thiserror::Error;

use crate::observability::{log_event_with_fields, Event};

/// Resource protected by a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey {
    pub index_id: u64,
    pub key: Vec<u8>,
}

impl LockKey {
    pub fn new(index_id: u64, key: impl Into<Vec<u8>>) -> Self {
        Self {
            index_id,
            key: key.into(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.index_id)?;
        for byte in &self.key {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// An exclusive hold on a `LockKey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    key: LockKey,
}

impl Lock {
    pub fn new(key: LockKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

/// Anything that can own locks.
pub trait LockOwner {
    fn owner_id(&self) -> u64;
}

/// Releases locks. Release never fails; misuse is a bug and is reported as
/// a fatal event.
pub trait LockManager: Send + Sync {
    fn unlock(&self, owner: &dyn LockOwner, lock: &Lock);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("lock {key} is held by owner {owner}")]
    Held { key: LockKey, owner: u64 },
}

/// In-memory exclusive lock table.
#[derive(Debug, Default)]
pub struct LockTable {
    held: Mutex<HashMap<LockKey, u64>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires an exclusive lock, failing if anyone (including `owner`)
    /// already holds it.
    pub fn lock_exclusive(
        &self,
        owner: &dyn LockOwner,
        index_id: u64,
        key: &[u8],
    ) -> Result<Lock, LockError> {
        let key = LockKey::new(index_id, key);
        let mut held = self.held.lock();
        if let Some(&holder) = held.get(&key) {
            return Err(LockError::Held { key, owner: holder });
        }
        held.insert(key.clone(), owner.owner_id());
        Ok(Lock::new(key))
    }

    pub fn holder(&self, key: &LockKey) -> Option<u64> {
        self.held.lock().get(key).copied()
    }

    pub fn is_locked(&self, key: &LockKey) -> bool {
        self.held.lock().contains_key(key)
    }

    /// Number of locks currently held.
    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LockManager for LockTable {
    fn unlock(&self, owner: &dyn LockOwner, lock: &Lock) {
        let mut held = self.held.lock();
        match held.get(lock.key()) {
            Some(&holder) if holder == owner.owner_id() => {
                held.remove(lock.key());
            }
            other => {
                let key = lock.key().to_string();
                let owner = owner.owner_id().to_string();
                let holder = other.map_or_else(|| "none".to_string(), |h| h.to_string());
                log_event_with_fields(
                    Event::LockReleaseViolation,
                    &[
                        ("holder", holder.as_str()),
                        ("key", key.as_str()),
                        ("owner", owner.as_str()),
                    ],
                );
            }
        }
    }
}
