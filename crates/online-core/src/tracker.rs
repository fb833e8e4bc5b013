//! Sliding-window presence tracker.
//!
//! The tracker is stateless: it turns the clock into bucket keys and hands
//! the work to a [`PresenceStore`]. Any number of trackers, in any number of
//! processes, can share a store as long as their [`SliceConfig`] matches.

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, TrackerError};
use crate::slice::SliceConfig;
use crate::store::{Batch, PresenceStore, Reply, StoreOp};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Fuzzy set of online identifiers.
///
/// A write lands in the bucket covering "now"; reads scan every bucket that
/// still overlaps the window. After its last [`mark_online`](Self::mark_online)
/// an identifier stays online for somewhere between `window - slice_size`
/// and `window` seconds, depending on where in its slice the write fell.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    clock: Arc<dyn Clock>,
    config: SliceConfig,
}

impl PresenceTracker {
    /// Create a tracker with a window of `window_secs` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::InvalidConfig`] if the window is zero.
    pub fn new(store: Arc<dyn PresenceStore>, window_secs: u64) -> Result<Self, TrackerError> {
        Ok(Self::from_config(
            store,
            SliceConfig::new(window_secs)?,
            Arc::new(SystemClock),
        ))
    }

    /// Create a tracker with the default 180 second window.
    #[must_use]
    pub fn with_default_window(store: Arc<dyn PresenceStore>) -> Self {
        Self::from_config(store, SliceConfig::default(), Arc::new(SystemClock))
    }

    /// Create a tracker from explicit parts.
    #[must_use]
    pub fn from_config(
        store: Arc<dyn PresenceStore>,
        config: SliceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        debug!(
            store = store.name(),
            window = config.window(),
            slice_size = config.slice_size(),
            buckets = config.active_bucket_count(),
            "Creating presence tracker"
        );
        Self {
            store,
            clock,
            config,
        }
    }

    /// Slicing parameters.
    #[must_use]
    pub fn config(&self) -> &SliceConfig {
        &self.config
    }

    /// Window length in seconds.
    #[must_use]
    pub fn window(&self) -> u64 {
        self.config.window()
    }

    /// Width of one bucket in seconds.
    #[must_use]
    pub fn slice_size(&self) -> u64 {
        self.config.slice_size()
    }

    /// Number of buckets consulted per read.
    #[must_use]
    pub fn active_bucket_count(&self) -> u64 {
        self.config.active_bucket_count()
    }

    /// Record activity for `id`.
    ///
    /// Adds `id` to the current bucket and re-arms that bucket's expiry in a
    /// single atomic batch.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::InvalidIdentifier`] for an empty `id`, or the
    /// store's error if the batch fails.
    pub async fn mark_online(&self, id: &str) -> Result<(), TrackerError> {
        if id.is_empty() {
            return Err(TrackerError::InvalidIdentifier);
        }

        let now = self.clock.now();
        let key = self.config.bucket_key(now);
        let expires_at = self.config.expires_at(now);

        let batch = Batch::atomic()
            .push(StoreOp::AddMember {
                key: key.clone(),
                member: id.to_string(),
            })
            .push(StoreOp::ExpireAt {
                key: key.clone(),
                at: expires_at,
            });

        self.run(batch, "mark_online").await?;
        debug!(id = %id, bucket = %key, expires_at, "Presence: marked online");
        Ok(())
    }

    /// Remove `id` from every active bucket.
    ///
    /// Absent identifiers, including the empty one, are not an error.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the batch fails.
    pub async fn mark_offline(&self, id: &str) -> Result<(), TrackerError> {
        if id.is_empty() {
            return Ok(());
        }

        let mut batch = Batch::pipeline();
        batch.extend(
            self.active_bucket_keys()
                .into_iter()
                .map(|key| StoreOp::RemoveMember {
                    key,
                    member: id.to_string(),
                }),
        );

        self.run(batch, "mark_offline").await?;
        debug!(id = %id, "Presence: marked offline");
        Ok(())
    }

    /// Check whether `id` was marked online within the window.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the batch fails.
    pub async fn is_online(&self, id: &str) -> Result<bool, TrackerError> {
        if id.is_empty() {
            return Ok(false);
        }

        let mut batch = Batch::pipeline();
        batch.extend(
            self.active_bucket_keys()
                .into_iter()
                .map(|key| StoreOp::IsMember {
                    key,
                    member: id.to_string(),
                }),
        );

        let mut online = false;
        for reply in self.run(batch, "is_online").await? {
            online |= reply.into_bool()?;
        }

        trace!(id = %id, online, "Presence: checked");
        Ok(online)
    }

    /// Negation of [`is_online`](Self::is_online).
    ///
    /// # Errors
    ///
    /// Returns the store's error if the batch fails.
    pub async fn is_offline(&self, id: &str) -> Result<bool, TrackerError> {
        Ok(!self.is_online(id).await?)
    }

    /// Every identifier currently considered online.
    ///
    /// Reads every active bucket in full; cost grows with the number of
    /// members, so keep this off hot paths.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the batch fails.
    pub async fn all_online(&self) -> Result<HashSet<String>, TrackerError> {
        let mut batch = Batch::pipeline();
        batch.extend(
            self.active_bucket_keys()
                .into_iter()
                .map(|key| StoreOp::Members { key }),
        );

        let mut online = HashSet::new();
        for reply in self.run(batch, "all_online").await? {
            online.extend(reply.into_members()?);
        }

        trace!(count = online.len(), "Presence: listed online");
        Ok(online)
    }

    fn active_bucket_keys(&self) -> Vec<String> {
        self.config.active_bucket_keys(self.clock.now())
    }

    async fn run(&self, batch: Batch, op: &'static str) -> Result<Vec<Reply>, StoreError> {
        let expected = batch.len();
        let replies = self.store.execute(batch).await.map_err(|e| {
            warn!(op, store = self.store.name(), error = %e, "Presence store failed");
            e
        })?;

        if replies.len() != expected {
            return Err(StoreError::UnexpectedReply(format!(
                "{} replies for {} commands",
                replies.len(),
                expected
            )));
        }
        Ok(replies)
    }
}

impl std::fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("store", &self.store.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;
    use async_trait::async_trait;

    fn tracker_at(now: i64, window: u64) -> (Arc<ManualClock>, Arc<MemoryStore>, PresenceTracker) {
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let tracker = PresenceTracker::from_config(
            store.clone(),
            SliceConfig::new(window).unwrap(),
            clock.clone(),
        );
        (clock, store, tracker)
    }

    #[test]
    fn test_tracker_config() {
        let store = Arc::new(MemoryStore::new());
        let tracker = PresenceTracker::with_default_window(store.clone());
        assert_eq!(tracker.window(), 180);
        assert_eq!(tracker.slice_size(), 30);
        assert_eq!(tracker.active_bucket_count(), 6);

        // Caller-supplied window is honored
        let tracker = PresenceTracker::new(store.clone(), 60).unwrap();
        assert_eq!(tracker.window(), 60);
        assert_eq!(tracker.slice_size(), 10);
        assert_eq!(tracker.active_bucket_count(), 6);

        assert!(matches!(
            PresenceTracker::new(store, 0),
            Err(TrackerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_online_within_window() {
        let (clock, store, tracker) = tracker_at(1000, 180);

        tracker.mark_online("u1").await.unwrap();
        assert_eq!(store.expiry("online:slice:990").await, Some(1170));

        clock.set(1005);
        assert!(tracker.is_online("u1").await.unwrap());

        // Last second that bucket 990 is still scanned
        clock.set(1169);
        assert!(tracker.is_online("u1").await.unwrap());

        clock.set(1170);
        assert!(!tracker.is_online("u1").await.unwrap());

        clock.set(1300);
        assert!(!tracker.is_online("u1").await.unwrap());
        assert!(tracker.is_offline("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_online_then_offline() {
        let (_, _, tracker) = tracker_at(1000, 180);

        tracker.mark_online("u2").await.unwrap();
        assert!(tracker.is_online("u2").await.unwrap());

        tracker.mark_offline("u2").await.unwrap();
        assert!(!tracker.is_online("u2").await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_clears_older_buckets() {
        let (clock, _, tracker) = tracker_at(1000, 180);

        tracker.mark_online("u3").await.unwrap();
        clock.advance(45);
        tracker.mark_online("u3").await.unwrap();
        clock.advance(45);

        tracker.mark_offline("u3").await.unwrap();
        assert!(!tracker.is_online("u3").await.unwrap());
        assert!(tracker.all_online().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_unknown_id_is_noop() {
        let (_, _, tracker) = tracker_at(1000, 180);
        tracker.mark_offline("ghost").await.unwrap();
        tracker.mark_offline("").await.unwrap();
        assert!(!tracker.is_online("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_identifier() {
        let (_, store, tracker) = tracker_at(1000, 180);

        assert!(matches!(
            tracker.mark_online("").await,
            Err(TrackerError::InvalidIdentifier)
        ));
        assert!(!tracker.is_online("").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_every_write_rearms_expiry() {
        let (clock, store, tracker) = tracker_at(1000, 180);

        for t in [990, 1000, 1019] {
            clock.set(t);
            tracker.mark_online("u").await.unwrap();
            let expiry = store.expiry("online:slice:990").await.unwrap();
            assert!(expiry >= 990 + tracker.window() as i64);
            assert_eq!(expiry, 1170);
        }
    }

    #[tokio::test]
    async fn test_expiry_covers_window_for_odd_windows() {
        for window in [1, 7, 59, 61, 100, 181] {
            let (_, store, tracker) = tracker_at(1_700_000_013, window);
            tracker.mark_online("u").await.unwrap();

            let q = tracker.config().quantize(1_700_000_013);
            let expiry = store
                .expiry(&tracker.config().bucket_key(q))
                .await
                .unwrap();
            assert!(expiry >= q + window as i64);
        }
    }

    #[tokio::test]
    async fn test_online_for_window_minus_one_slice() {
        for window in [1, 7, 30, 180] {
            let (clock, _, tracker) = tracker_at(5000, window);
            tracker.mark_online("u").await.unwrap();

            let guaranteed = (window - tracker.slice_size()) as i64;
            for dt in 0..guaranteed {
                clock.set(5000 + dt);
                assert!(
                    tracker.is_online("u").await.unwrap(),
                    "window {window}, offset {dt}"
                );
            }

            let span = (tracker.slice_size() * tracker.active_bucket_count()) as i64;
            clock.set(5000 + span);
            assert!(!tracker.is_online("u").await.unwrap(), "window {window}");
        }
    }

    #[tokio::test]
    async fn test_all_online_matches_is_online() {
        let (clock, _, tracker) = tracker_at(1000, 180);

        tracker.mark_online("a").await.unwrap();
        clock.advance(60);
        tracker.mark_online("b").await.unwrap();
        clock.advance(60);
        tracker.mark_online("c").await.unwrap();
        tracker.mark_offline("b").await.unwrap();
        clock.advance(70);

        let all = tracker.all_online().await.unwrap();
        for id in ["a", "b", "c"] {
            assert_eq!(all.contains(id), tracker.is_online(id).await.unwrap());
        }
        assert_eq!(all, HashSet::from(["c".to_string()]));
    }

    #[tokio::test]
    async fn test_shared_store_across_trackers() {
        let (clock, store, writer) = tracker_at(2000, 180);
        let reader = PresenceTracker::from_config(store, SliceConfig::new(180).unwrap(), clock);

        writer.mark_online("shared").await.unwrap();
        assert!(reader.is_online("shared").await.unwrap());

        reader.mark_offline("shared").await.unwrap();
        assert!(!writer.is_online("shared").await.unwrap());
    }

    #[tokio::test]
    async fn test_key_prefix_isolates_trackers() {
        let (clock, store, default) = tracker_at(2000, 180);
        let other = PresenceTracker::from_config(
            store,
            SliceConfig::new(180).unwrap().with_key_prefix("other:"),
            clock,
        );

        default.mark_online("u").await.unwrap();
        assert!(!other.is_online("u").await.unwrap());
    }

    struct FailingStore;

    #[async_trait]
    impl PresenceStore for FailingStore {
        async fn add_member(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn remove_member(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn is_member(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn members(&self, _: &str) -> Result<HashSet<String>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn set_expire_at(&self, _: &str, _: i64) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }

        async fn execute(&self, _: Batch) -> Result<Vec<Reply>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let tracker = PresenceTracker::with_default_window(Arc::new(FailingStore));

        assert!(matches!(
            tracker.mark_online("u").await,
            Err(TrackerError::Store(StoreError::Unavailable(_)))
        ));
        assert!(tracker.mark_offline("u").await.is_err());
        assert!(tracker.is_online("u").await.is_err());
        assert!(tracker.all_online().await.is_err());
    }

    /// A store without transactions cannot take the write path.
    struct SequentialStore(MemoryStore);

    #[async_trait]
    impl PresenceStore for SequentialStore {
        async fn add_member(&self, key: &str, member: &str) -> Result<(), StoreError> {
            self.0.add_member(key, member).await
        }

        async fn remove_member(&self, key: &str, member: &str) -> Result<(), StoreError> {
            self.0.remove_member(key, member).await
        }

        async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
            self.0.is_member(key, member).await
        }

        async fn members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
            self.0.members(key).await
        }

        async fn set_expire_at(&self, key: &str, at: i64) -> Result<(), StoreError> {
            self.0.set_expire_at(key, at).await
        }

        fn name(&self) -> &'static str {
            "sequential"
        }
    }

    #[tokio::test]
    async fn test_write_requires_atomic_store() {
        let store = Arc::new(SequentialStore(MemoryStore::new()));
        let tracker = PresenceTracker::with_default_window(store.clone());

        assert!(matches!(
            tracker.mark_online("u").await,
            Err(TrackerError::Store(StoreError::Unsupported(_)))
        ));
        assert!(store.0.is_empty().await);

        // Reads and removals are pipelined and still work
        assert!(!tracker.is_online("u").await.unwrap());
        tracker.mark_offline("u").await.unwrap();
    }
}
