//! Store abstraction for presence buckets.
//!
//! The tracker only needs a handful of set operations plus absolute key
//! expiry. Anything that can provide them (Redis, an in-memory map) can back
//! a [`PresenceTracker`](crate::PresenceTracker).

use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashSet;

/// A single store command inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Add a member to a set, creating the set if needed.
    AddMember { key: String, member: String },
    /// Remove a member from a set. No-op if absent.
    RemoveMember { key: String, member: String },
    /// Test set membership.
    IsMember { key: String, member: String },
    /// Read a whole set.
    Members { key: String },
    /// Expire a key at an absolute time in epoch seconds.
    ExpireAt { key: String, at: i64 },
}

/// Reply to a single [`StoreOp`], in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Command succeeded with nothing to report.
    Done,
    /// Result of a membership test.
    Bool(bool),
    /// Contents of a set.
    Members(HashSet<String>),
}

impl Reply {
    /// Interpret as a membership result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnexpectedReply`] for any other reply.
    pub fn into_bool(self) -> Result<bool, StoreError> {
        match self {
            Reply::Bool(b) => Ok(b),
            other => Err(StoreError::UnexpectedReply(format!(
                "expected bool, got {:?}",
                other
            ))),
        }
    }

    /// Interpret as set contents.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnexpectedReply`] for any other reply.
    pub fn into_members(self) -> Result<HashSet<String>, StoreError> {
        match self {
            Reply::Members(m) => Ok(m),
            other => Err(StoreError::UnexpectedReply(format!(
                "expected members, got {:?}",
                other
            ))),
        }
    }
}

/// An ordered group of commands sent in one round trip.
///
/// Atomic batches are applied all-or-nothing. Non-atomic batches are
/// pipelined; each command stands on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<StoreOp>,
    atomic: bool,
}

impl Batch {
    /// Create an empty pipelined batch.
    #[must_use]
    pub fn pipeline() -> Self {
        Self::default()
    }

    /// Create an empty all-or-nothing batch.
    #[must_use]
    pub fn atomic() -> Self {
        Self {
            ops: Vec::new(),
            atomic: true,
        }
    }

    /// Append a command.
    #[must_use]
    pub fn push(mut self, op: StoreOp) -> Self {
        self.ops.push(op);
        self
    }

    /// Whether the batch must be applied all-or-nothing.
    #[must_use]
    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    /// Number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Check if the batch has no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Borrow the commands.
    #[must_use]
    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    /// Take the commands.
    #[must_use]
    pub fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }
}

impl Extend<StoreOp> for Batch {
    fn extend<I: IntoIterator<Item = StoreOp>>(&mut self, iter: I) {
        self.ops.extend(iter);
    }
}

/// Set store used by the tracker.
///
/// Implementations must be safe to share between tasks; the tracker holds
/// them behind an `Arc` and never serializes calls.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Add `member` to the set at `key`.
    async fn add_member(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Remove `member` from the set at `key`. Absent members are not an error.
    async fn remove_member(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Check whether `member` is in the set at `key`.
    async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Read the set at `key`. Missing keys read as empty.
    async fn members(&self, key: &str) -> Result<HashSet<String>, StoreError>;

    /// Expire `key` at `at` epoch seconds.
    async fn set_expire_at(&self, key: &str, at: i64) -> Result<(), StoreError>;

    /// Get the store name (e.g., "memory", "redis").
    fn name(&self) -> &'static str;

    /// Run a batch and return one reply per command, in order.
    ///
    /// The default runs commands one at a time and therefore cannot honor
    /// atomic batches. Stores with transactions must override it.
    async fn execute(&self, batch: Batch) -> Result<Vec<Reply>, StoreError> {
        if batch.is_atomic() {
            return Err(StoreError::Unsupported("atomic batch"));
        }

        let mut replies = Vec::with_capacity(batch.len());
        for op in batch.into_ops() {
            let reply = match op {
                StoreOp::AddMember { key, member } => {
                    self.add_member(&key, &member).await?;
                    Reply::Done
                }
                StoreOp::RemoveMember { key, member } => {
                    self.remove_member(&key, &member).await?;
                    Reply::Done
                }
                StoreOp::IsMember { key, member } => Reply::Bool(self.is_member(&key, &member).await?),
                StoreOp::Members { key } => Reply::Members(self.members(&key).await?),
                StoreOp::ExpireAt { key, at } => {
                    self.set_expire_at(&key, at).await?;
                    Reply::Done
                }
            };
            replies.push(reply);
        }
        Ok(replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records calls; only implements the single-op methods.
    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PresenceStore for RecordingStore {
        async fn add_member(&self, key: &str, member: &str) -> Result<(), StoreError> {
            self.calls.lock().unwrap().push(format!("sadd {key} {member}"));
            Ok(())
        }

        async fn remove_member(&self, key: &str, member: &str) -> Result<(), StoreError> {
            self.calls.lock().unwrap().push(format!("srem {key} {member}"));
            Ok(())
        }

        async fn is_member(&self, key: &str, _member: &str) -> Result<bool, StoreError> {
            Ok(key == "b")
        }

        async fn members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
            Ok(HashSet::from([format!("in-{key}")]))
        }

        async fn set_expire_at(&self, key: &str, at: i64) -> Result<(), StoreError> {
            self.calls.lock().unwrap().push(format!("expireat {key} {at}"));
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_default_execute_runs_in_order() {
        let store = RecordingStore::default();
        let batch = Batch::pipeline()
            .push(StoreOp::RemoveMember {
                key: "a".into(),
                member: "x".into(),
            })
            .push(StoreOp::IsMember {
                key: "b".into(),
                member: "x".into(),
            })
            .push(StoreOp::Members { key: "c".into() });

        let replies = store.execute(batch).await.unwrap();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], Reply::Done);
        assert_eq!(replies[1], Reply::Bool(true));
        assert_eq!(
            replies[2],
            Reply::Members(HashSet::from(["in-c".to_string()]))
        );
        assert_eq!(*store.calls.lock().unwrap(), vec!["srem a x".to_string()]);
    }

    #[tokio::test]
    async fn test_default_execute_refuses_atomic() {
        let store = RecordingStore::default();
        let batch = Batch::atomic().push(StoreOp::AddMember {
            key: "a".into(),
            member: "x".into(),
        });

        let result = store.execute(batch).await;
        assert!(matches!(result, Err(StoreError::Unsupported(_))));
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reply_conversions() {
        assert!(Reply::Bool(true).into_bool().unwrap());
        assert!(Reply::Done.into_bool().is_err());
        assert!(Reply::Members(HashSet::new()).into_members().unwrap().is_empty());
        assert!(Reply::Bool(false).into_members().is_err());
    }
}
