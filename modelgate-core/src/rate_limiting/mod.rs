//! Multi-granularity sliding-window rate limiting over per-identity usage
//! histories.
//!
//! Three independent windowed thresholds run in a fixed order — 60-second
//! `rpm`, 3600-second `rph`, then the configurable window — so results are
//! deterministic for a given history. A zero limit disables its check.
//! Histories are pruned to the 24-hour retention horizon on every
//! invocation, which bounds bucket growth under sustained traffic.

mod store;

pub use store::{Clock, InMemoryUsageStore, SystemClock, UsageKey, UsageStore};

use strum::Display;

use crate::config::{PermissionSet, RateLimits};

/// Accounting target used for every model when global accounting is on.
pub const GLOBAL_TARGET: &str = "GLOBAL";

/// Events older than this never influence any window check and are pruned.
pub const HISTORY_RETENTION_SECS: u64 = 86_400;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum WindowKind {
    #[strum(serialize = "RPM limit")]
    PerMinute,
    #[strum(serialize = "RPH limit")]
    PerHour,
    #[strum(serialize = "window limit")]
    Custom,
}

impl WindowKind {
    fn window_secs(self, limits: &RateLimits) -> u64 {
        match self {
            WindowKind::PerMinute => 60,
            WindowKind::PerHour => 3_600,
            WindowKind::Custom => limits.window_minutes * 60,
        }
    }

    fn threshold(self, limits: &RateLimits) -> u32 {
        match self {
            WindowKind::PerMinute => limits.rpm,
            WindowKind::PerHour => limits.rph,
            WindowKind::Custom => limits.window_limit,
        }
    }
}

/// A tripped limit: which cohort's limits tripped, and which window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LimitHit {
    pub owner: String,
    pub kind: WindowKind,
}

impl LimitHit {
    /// Reason string fed into the `rate_limit_deny` template.
    pub fn reason(&self) -> String {
        format!("{} {}", self.owner, self.kind)
    }
}

/// Cohort labels for reason strings.
#[derive(Clone, Copy, Debug)]
pub struct LimitScope<'a> {
    pub user_group_id: &'a str,
    pub model_group_id: Option<&'a str>,
}

fn count_since(history: &[u64], now: u64, window_secs: u64) -> usize {
    history
        .iter()
        .filter(|&&t| now.saturating_sub(t) < window_secs)
        .count()
}

/// First tripped window for one limit set, in the fixed check order.
fn window_hit(limits: &RateLimits, history: &[u64], now: u64) -> Option<WindowKind> {
    for kind in [WindowKind::PerMinute, WindowKind::PerHour, WindowKind::Custom] {
        let threshold = kind.threshold(limits);
        let window_secs = kind.window_secs(limits);
        if threshold == 0 || window_secs == 0 {
            continue;
        }
        if count_since(history, now, window_secs) >= threshold as usize {
            return Some(kind);
        }
    }
    None
}

/// Sliding-window rate limiter over an injectable store and clock.
pub struct RateLimiter<S = InMemoryUsageStore, C = SystemClock> {
    store: S,
    clock: C,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            store: InMemoryUsageStore::new(),
            clock: SystemClock,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: UsageStore, C: Clock> RateLimiter<S, C> {
    pub fn with_parts(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Evaluates `permission` for one request against the (identity, target)
    /// bucket and, when nothing trips, records the request. The bucket is
    /// held exclusively for the whole prune-check-append sequence; a tripped
    /// check records nothing (a fallback-substituted request does not count
    /// as usage).
    pub fn check_and_record(
        &self,
        permission: &PermissionSet,
        scope: LimitScope<'_>,
        user_id: &str,
        target: &str,
    ) -> Option<LimitHit> {
        let now = self.clock.now_secs();
        self.store
            .with_bucket(UsageKey::new(user_id, target), |history| {
                history.retain(|&t| now.saturating_sub(t) < HISTORY_RETENTION_SECS);

                let user_hit = window_hit(&permission.limits, history, now).map(|kind| LimitHit {
                    owner: format!("user group `{}`", scope.user_group_id),
                    kind,
                });

                let hit = if permission.user_priority {
                    // Legacy user-priority mode: a model-side hit alone never
                    // rejects.
                    user_hit
                } else {
                    user_hit.or_else(|| {
                        permission.model_limits.as_ref().and_then(|limits| {
                            window_hit(limits, history, now).map(|kind| LimitHit {
                                owner: format!(
                                    "model group `{}`",
                                    scope.model_group_id.unwrap_or("-")
                                ),
                                kind,
                            })
                        })
                    })
                };

                if hit.is_none() {
                    history.push(now);
                }
                hit
            })
    }
}
