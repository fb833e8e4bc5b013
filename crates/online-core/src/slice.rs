//! Time slicing for the presence window.
//!
//! The window is split into [`SLICE_COUNT`] slices of `slice_size` seconds.
//! Every instant maps to the slice that starts at the instant rounded down to
//! a multiple of `slice_size`; that start time names the bucket in the store.

use crate::error::TrackerError;

/// Number of slices the window is divided into.
pub const SLICE_COUNT: u64 = 6;

/// Default inactivity window in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 180;

/// Default namespace for bucket keys.
pub const DEFAULT_KEY_PREFIX: &str = "online:slice:";

/// Immutable slicing parameters shared by every tracker that talks to the
/// same set of buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceConfig {
    window: u64,
    slice_size: u64,
    active_bucket_count: u64,
    key_prefix: String,
}

impl SliceConfig {
    /// Create a slice configuration for a window of `window_secs` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::InvalidConfig`] if the window is zero, or so
    /// large that a bucket's lifetime does not fit in epoch seconds.
    pub fn new(window_secs: u64) -> Result<Self, TrackerError> {
        if window_secs == 0 {
            return Err(TrackerError::InvalidConfig("window must be positive"));
        }

        let slice_size = window_secs.div_ceil(SLICE_COUNT);
        let lifetime = slice_size.checked_mul(SLICE_COUNT);
        if lifetime.map_or(true, |l| l > i64::MAX as u64) {
            return Err(TrackerError::InvalidConfig("window too large"));
        }
        let active_bucket_count = window_secs.div_ceil(slice_size);

        Ok(Self {
            window: window_secs,
            slice_size,
            active_bucket_count,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        })
    }

    /// Use a different key namespace.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Window length in seconds.
    #[must_use]
    pub fn window(&self) -> u64 {
        self.window
    }

    /// Width of one slice in seconds.
    #[must_use]
    pub fn slice_size(&self) -> u64 {
        self.slice_size
    }

    /// Number of buckets consulted per read.
    #[must_use]
    pub fn active_bucket_count(&self) -> u64 {
        self.active_bucket_count
    }

    /// Key namespace.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Time span every bucket is provisioned to live, measured from its own
    /// quantized start.
    #[must_use]
    pub fn bucket_lifetime(&self) -> u64 {
        self.slice_size * SLICE_COUNT
    }

    /// Round `time` down to the start of its slice.
    pub(crate) fn quantize(&self, time: i64) -> i64 {
        time - time.rem_euclid(self.slice_size as i64)
    }

    /// Absolute expiry (epoch seconds) for the bucket containing `time`.
    pub(crate) fn expires_at(&self, time: i64) -> i64 {
        self.quantize(time)
            .saturating_add(self.bucket_lifetime() as i64)
    }

    /// Store key for the bucket containing `time`.
    pub(crate) fn bucket_key(&self, time: i64) -> String {
        format!("{}{}", self.key_prefix, self.quantize(time))
    }

    /// Quantized start times of the active buckets, newest first.
    pub(crate) fn active_bucket_times(&self, starting_at: i64) -> Vec<i64> {
        let step = self.slice_size as i64;
        let mut at = starting_at;
        let mut times = Vec::with_capacity(self.active_bucket_count as usize);
        for _ in 0..self.active_bucket_count {
            times.push(self.quantize(at));
            at = at.saturating_sub(step);
        }
        times
    }

    /// Store keys of the active buckets, newest first.
    pub(crate) fn active_bucket_keys(&self, starting_at: i64) -> Vec<String> {
        self.active_bucket_times(starting_at)
            .into_iter()
            .map(|time| self.bucket_key(time))
            .collect()
    }
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW_SECS,
            slice_size: DEFAULT_WINDOW_SECS / SLICE_COUNT,
            active_bucket_count: SLICE_COUNT,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}
