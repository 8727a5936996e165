//! Per-tag minimum dispatch intervals.

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

/// Convert seconds into an interval; non-positive or invalid means unlimited.
fn interval_from_secs(seconds: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|interval| !interval.is_zero())
}

/// Minimum interval between dispatches, per tag.
///
/// Lookup for a task's tag: the tag's own entry if it has one (an explicit
/// `None` entry means unlimited), otherwise the untagged default, otherwise
/// no limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimits {
    default: Option<Duration>,
    tags: HashMap<String, Option<Duration>>,
}

impl RateLimits {
    /// No limits at all.
    #[inline]
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Limit untagged tasks (and tags without an entry) to one dispatch per
    /// `seconds`.
    pub fn per_call(seconds: f64) -> Self {
        Self {
            default: interval_from_secs(seconds),
            tags: HashMap::new(),
        }
    }

    /// Set the untagged default interval.
    #[inline]
    pub fn with_default(
        mut self,
        interval: Option<Duration>,
    ) -> Self {
        self.default = interval.filter(|interval| !interval.is_zero());
        self
    }

    /// Set the interval for `tag`; `None` makes the tag unlimited.
    #[inline]
    pub fn with_tag(
        mut self,
        tag: impl Into<String>,
        interval: Option<Duration>,
    ) -> Self {
        self.tags
            .insert(tag.into(), interval.filter(|interval| !interval.is_zero()));
        self
    }

    /// Set the interval for `tag` in seconds; non-positive means unlimited.
    #[inline]
    pub fn with_tag_secs(
        self,
        tag: impl Into<String>,
        seconds: f64,
    ) -> Self {
        self.with_tag(tag, interval_from_secs(seconds))
    }

    /// Interval to enforce for a task carrying `tag`.
    pub fn interval_for(
        &self,
        tag: Option<&str>,
    ) -> Duration {
        let configured = match tag.and_then(|tag| self.tags.get(tag)) {
            Some(interval) => *interval,
            None => self.default,
        };
        configured.unwrap_or(Duration::ZERO)
    }

    /// Whether no tag is limited.
    pub fn is_unlimited(&self) -> bool {
        self.default.is_none() && self.tags.values().all(Option::is_none)
    }
}

/// Tracks the last dispatch per tag and sleeps to honor [`RateLimits`].
///
/// Owned by the dispatch thread; never shared.
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    last_dispatch: HashMap<Option<String>, Instant>,
}

impl RateLimiter {
    /// Create a limiter with no dispatch history.
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            last_dispatch: HashMap::new(),
        }
    }

    /// Configured limits.
    #[inline]
    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Block until a task tagged `tag` may be dispatched, then record the
    /// dispatch. Returns how long the call slept.
    pub fn acquire(
        &mut self,
        tag: Option<&str>,
    ) -> Duration {
        let wait = self.limits.interval_for(tag);
        if wait.is_zero() {
            return Duration::ZERO;
        }

        let started = Instant::now();
        let mut slept = false;
        let key = tag.map(str::to_owned);
        if let Some(&last) = self.last_dispatch.get(&key) {
            // Sleep may return early; re-check until the interval has passed.
            loop {
                let elapsed = last.elapsed();
                if elapsed >= wait {
                    break;
                }
                thread::sleep(wait - elapsed);
                slept = true;
            }
        }
        self.last_dispatch.insert(key, Instant::now());
        if slept {
            started.elapsed()
        } else {
            Duration::ZERO
        }
    }
}
