//! Shared fixtures for the presence benchmarks.

use online_core::{ManualClock, MemoryStore, PresenceTracker, SliceConfig};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Epoch second the benchmark clock starts at.
pub const START: i64 = 1_700_000_000;

/// A tracker over an in-memory store with a hand-driven clock.
pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub tracker: PresenceTracker,
}

impl Fixture {
    /// Empty store, `window_secs` second window.
    ///
    /// # Panics
    ///
    /// Panics if `window_secs` is not a valid window.
    #[must_use]
    pub fn new(window_secs: u64) -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let config = SliceConfig::new(window_secs).expect("invalid benchmark window");
        let tracker = PresenceTracker::from_config(store.clone(), config, clock.clone());
        Self {
            clock,
            store,
            tracker,
        }
    }

    /// Spread `members` identifiers over every active bucket.
    ///
    /// # Panics
    ///
    /// Panics if a write fails.
    pub fn populate(&self, rt: &Runtime, members: usize) {
        let buckets = self.tracker.active_bucket_count() as usize;
        let step = self.tracker.slice_size() as i64;
        let start = START - step * (buckets as i64 - 1);

        rt.block_on(async {
            for i in 0..members {
                self.clock.set(start + step * (i % buckets) as i64);
                self.tracker
                    .mark_online(&format!("user:{}", i))
                    .await
                    .expect("failed to populate benchmark store");
            }
        });
        self.clock.set(START);
    }
}

/// Single-threaded runtime for driving async calls from criterion.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
#[must_use]
pub fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
}
