//! Per-source fixed-window rate limiting.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::duration_ms;
use crate::SourceId;

/// What the orchestrator does when the gate rejects a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnRateLimit {
    /// Sleep for `retry_after` (bounded by the deadline), then try the gate once more.
    Wait,
    /// Record a rate-limited result immediately.
    #[default]
    Reject,
}

/// `limit` calls per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitQuota {
    pub limit: u32,
    #[serde(rename = "window_ms", with = "duration_ms")]
    pub window: Duration,
    #[serde(default)]
    pub on_reject: OnRateLimit,
}

impl RateLimitQuota {
    pub const fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(60),
            on_reject: OnRateLimit::Reject,
        }
    }

    pub const fn per_day(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(86_400),
            on_reject: OnRateLimit::Reject,
        }
    }

    pub const fn with_policy(mut self, on_reject: OnRateLimit) -> Self {
        self.on_reject = on_reject;
        self
    }
}

/// Gate decision for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Time until the current window resets. Set only when rejected.
    pub retry_after: Option<Duration>,
}

impl Admission {
    const fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }

    const fn rejected(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after),
        }
    }
}

#[derive(Debug)]
struct RateLimitState {
    quota: RateLimitQuota,
    window_start: Option<Instant>,
    count: u32,
}

impl RateLimitState {
    /// Start of the current window, resetting the counter when the old one ended.
    fn roll(&mut self, now: Instant) -> Instant {
        match self.window_start {
            Some(start) if now.saturating_duration_since(start) < self.quota.window => start,
            _ => {
                self.window_start = Some(now);
                self.count = 0;
                now
            }
        }
    }
}

/// Fixed-window call counter, one lock per source.
#[derive(Debug, Default)]
pub struct RateLimitGate {
    states: HashMap<SourceId, Mutex<RateLimitState>>,
}

impl RateLimitGate {
    pub fn new<I>(quotas: I) -> Self
    where
        I: IntoIterator<Item = (SourceId, RateLimitQuota)>,
    {
        let states = quotas
            .into_iter()
            .map(|(source, quota)| {
                let state = RateLimitState {
                    quota,
                    window_start: None,
                    count: 0,
                };
                (source, Mutex::new(state))
            })
            .collect();
        Self { states }
    }

    /// Count one call against `source`'s window. Rejected calls are not counted.
    ///
    /// Sources without a quota are always allowed.
    pub fn try_acquire(&self, source: SourceId) -> Admission {
        let Some(state) = self.states.get(&source) else {
            return Admission::allowed();
        };

        let mut state = lock_state(state);
        let now = Instant::now();
        let start = state.roll(now);

        if state.count < state.quota.limit {
            state.count += 1;
            return Admission::allowed();
        }

        let retry_after = (start + state.quota.window).saturating_duration_since(now);
        debug!(
            source = source.as_str(),
            limit = state.quota.limit,
            retry_after_ms = retry_after.as_millis() as u64,
            "rate limit gate rejected call"
        );
        Admission::rejected(retry_after)
    }

    pub fn policy(&self, source: SourceId) -> OnRateLimit {
        self.states
            .get(&source)
            .map(|state| lock_state(state).quota.on_reject)
            .unwrap_or_default()
    }

    /// Calls left in the current window, or `None` when `source` is unlimited.
    pub fn remaining(&self, source: SourceId) -> Option<u32> {
        let state = self.states.get(&source)?;
        let mut state = lock_state(state);
        state.roll(Instant::now());
        Some(state.quota.limit.saturating_sub(state.count))
    }
}

fn lock_state(state: &Mutex<RateLimitState>) -> MutexGuard<'_, RateLimitState> {
    state.lock().unwrap_or_else(|poisoned| {
        warn!("rate limit state lock was poisoned, recovering");
        poisoned.into_inner()
    })
}
