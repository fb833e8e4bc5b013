//! # online-core
//!
//! Fuzzy "who is online" tracking backed by a shared set store.
//!
//! A sliding window of `W` seconds is cut into a fixed number of slices.
//! Each slice is a set in the store, keyed by its quantized start time and
//! provisioned with an absolute expiry. Writes land in the current slice only;
//! reads consult every slice that still overlaps the window.
//!
//! This crate provides:
//!
//! - **PresenceTracker** - Mark identifiers online/offline and query them
//! - **PresenceStore** - The set-store capability the tracker needs
//! - **MemoryStore** - In-process store for tests and benchmarks
//! - **RedisStore** - Networked store (behind the `redis` feature)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │   Caller    │────▶│ PresenceTracker │────▶│  PresenceStore   │
//! └─────────────┘     └─────────────────┘     └──────────────────┘
//!                            │                  │            │
//!                            ▼                  ▼            ▼
//!                     ┌─────────────┐    ┌───────────┐ ┌───────────┐
//!                     │ SliceConfig │    │  Memory   │ │   Redis   │
//!                     └─────────────┘    └───────────┘ └───────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use online_core::{MemoryStore, PresenceTracker};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), online_core::TrackerError> {
//! let tracker = PresenceTracker::new(Arc::new(MemoryStore::new()), 180)?;
//!
//! tracker.mark_online("user:42").await?;
//! assert!(tracker.is_online("user:42").await?);
//!
//! tracker.mark_offline("user:42").await?;
//! assert!(tracker.is_offline("user:42").await?);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod memory;
pub mod slice;
pub mod store;
pub mod tracker;

#[cfg(feature = "redis")]
pub mod redis;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, TrackerError};
pub use memory::MemoryStore;
pub use slice::{SliceConfig, DEFAULT_KEY_PREFIX, DEFAULT_WINDOW_SECS, SLICE_COUNT};
pub use store::{Batch, PresenceStore, Reply, StoreOp};
pub use tracker::PresenceTracker;

#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
