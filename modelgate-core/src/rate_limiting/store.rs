//! Keyed usage-history storage and the injectable time source.

use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

/// Accounting key: one identity's usage against one target (a model id, or
/// the global sentinel).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UsageKey {
    pub user_id: String,
    pub target: String,
}

impl UsageKey {
    pub fn new(user_id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            target: target.into(),
        }
    }
}

/// Keyed store of per-bucket event timestamps (unix seconds, ascending).
///
/// Implementations must give `f` exclusive access to the bucket for the
/// whole closure: the limiter's read-prune-check-append sequence relies on
/// it, including on early exits.
pub trait UsageStore: Send + Sync {
    fn with_bucket<R>(&self, key: UsageKey, f: impl FnOnce(&mut Vec<u64>) -> R) -> R;
}

/// Process-lifetime in-memory store. Buckets are created lazily on first
/// use; the map entry guard provides the per-bucket exclusive scope.
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    buckets: DashMap<UsageKey, Vec<u64>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of recorded events in one bucket.
    pub fn bucket_len(&self, key: &UsageKey) -> usize {
        self.buckets.get(key).map_or(0, |bucket| bucket.len())
    }
}

impl UsageStore for InMemoryUsageStore {
    fn with_bucket<R>(&self, key: UsageKey, f: impl FnOnce(&mut Vec<u64>) -> R) -> R {
        let mut bucket = self.buckets.entry(key).or_default();
        f(bucket.value_mut())
    }
}

/// Time source for window checks, injectable so tests can run on a manual
/// clock instead of sleeping.
pub trait Clock: Send + Sync {
    /// Seconds since the unix epoch.
    fn now_secs(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }
}
