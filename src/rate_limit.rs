//! Minimal per-category log rate limiting.
//!
//! `spec.md` places the full "leveled logger with rate-limited categories"
//! out of scope as an external collaborator, but several core behaviors
//! (§4.4's sync-producer error logging, §4.6's `IncompleteRead` branch,
//! §7's pool-exhaustion counter) are specified in terms of "log at most once
//! per 30 s per category". This is the small in-core gate that satisfies
//! that requirement without reimplementing the full sink facility.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Gates repeated log lines to at most one per category per `window`.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    last_emitted: Mutex<HashMap<&'static str, Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` the first time `category` is seen, and again every
    /// time `window` has elapsed since the last `true`; otherwise `false`.
    #[must_use]
    pub fn allow(&self, category: &'static str) -> bool {
        let now = Instant::now();
        #[allow(clippy::unwrap_used, reason = "poisoned only on a prior panic while holding the lock")]
        let mut last_emitted = self.last_emitted.lock().unwrap();
        match last_emitted.get(category) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                last_emitted.insert(category, now);
                true
            }
        }
    }
}
