//! In-process [`PresenceStore`].
//!
//! Mirrors the Redis semantics the tracker relies on: sets spring into
//! existence on first add, expired keys read as absent, and an add to an
//! expired key starts a fresh set with no expiry.

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::store::{Batch, PresenceStore, Reply, StoreOp};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Debug, Default)]
struct Entry {
    members: HashSet<String>,
    expires_at: Option<i64>,
}

impl Entry {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Map of key to set, guarded by a single lock.
#[derive(Default)]
struct Sets {
    entries: HashMap<String, Entry>,
}

impl Sets {
    fn live(&self, key: &str, now: i64) -> Option<&Entry> {
        self.entries.get(key).filter(|e| !e.is_expired(now))
    }

    fn apply(&mut self, op: StoreOp, now: i64) -> Reply {
        match op {
            StoreOp::AddMember { key, member } => {
                let entry = self.entries.entry(key).or_default();
                if entry.is_expired(now) {
                    *entry = Entry::default();
                }
                entry.members.insert(member);
                Reply::Done
            }
            StoreOp::RemoveMember { key, member } => {
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.members.remove(&member);
                    // Empty sets disappear, as in Redis.
                    if entry.members.is_empty() || entry.is_expired(now) {
                        self.entries.remove(&key);
                    }
                }
                Reply::Done
            }
            StoreOp::IsMember { key, member } => Reply::Bool(
                self.live(&key, now)
                    .is_some_and(|e| e.members.contains(&member)),
            ),
            StoreOp::Members { key } => Reply::Members(
                self.live(&key, now)
                    .map(|e| e.members.clone())
                    .unwrap_or_default(),
            ),
            StoreOp::ExpireAt { key, at } => {
                if let Some(entry) = self.entries.get_mut(&key) {
                    if entry.is_expired(now) {
                        self.entries.remove(&key);
                    } else {
                        entry.expires_at = Some(at);
                    }
                }
                Reply::Done
            }
        }
    }
}

/// In-memory set store with absolute expiry.
///
/// Every batch runs under one write lock, so both atomic and pipelined
/// batches are applied all-or-nothing.
pub struct MemoryStore {
    sets: RwLock<Sets>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that judges expiry by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            sets: RwLock::new(Sets::default()),
            clock,
        }
    }

    /// Absolute expiry of a live key, if one is set.
    pub async fn expiry(&self, key: &str) -> Option<i64> {
        let now = self.clock.now();
        self.sets.read().await.live(key, now)?.expires_at
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let sets = self.sets.read().await;
        sets.entries.values().filter(|e| !e.is_expired(now)).count()
    }

    /// Check if there are no live keys.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired keys.
    ///
    /// Returns the keys that were removed.
    pub async fn purge_expired(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut sets = self.sets.write().await;
        let expired: Vec<String> = sets
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            sets.entries.remove(key);
            trace!(key = %key, "MemoryStore: purged expired key");
        }

        expired
    }

    async fn apply(&self, op: StoreOp) -> Reply {
        let now = self.clock.now();
        self.sets.write().await.apply(op, now)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn add_member(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.apply(StoreOp::AddMember {
            key: key.to_string(),
            member: member.to_string(),
        })
        .await;
        Ok(())
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.apply(StoreOp::RemoveMember {
            key: key.to_string(),
            member: member.to_string(),
        })
        .await;
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let sets = self.sets.read().await;
        Ok(sets
            .live(key, now)
            .is_some_and(|e| e.members.contains(member)))
    }

    async fn members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        let now = self.clock.now();
        let sets = self.sets.read().await;
        Ok(sets
            .live(key, now)
            .map(|e| e.members.clone())
            .unwrap_or_default())
    }

    async fn set_expire_at(&self, key: &str, at: i64) -> Result<(), StoreError> {
        self.apply(StoreOp::ExpireAt {
            key: key.to_string(),
            at,
        })
        .await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn execute(&self, batch: Batch) -> Result<Vec<Reply>, StoreError> {
        let now = self.clock.now();
        let mut sets = self.sets.write().await;
        Ok(batch
            .into_ops()
            .into_iter()
            .map(|op| sets.apply(op, now))
            .collect())
    }
}
