//! Per-account rate limiting of failed login proofs.
//!
//! `createSession` records every rejected proof; once an account accumulates
//! more than the configured number of failures inside the window, further
//! attempts are refused with `RateLimited` until the window slides past.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use lockbox_core::account::AccountId;
use parking_lot::Mutex;

/// Tracks failed proof attempts per account id.
#[derive(Clone)]
pub(crate) struct RateLimiter {
    failures: Arc<Mutex<HashMap<AccountId, Vec<SystemTime>>>>,
    max_failures: u32,
    window: Duration,
}

impl RateLimiter {
    /// Creates a limiter allowing `max_failures` failed proofs per `window`.
    pub(crate) fn new(max_failures: u32, window: Duration) -> Self {
        Self {
            failures: Arc::new(Mutex::new(HashMap::new())),
            max_failures,
            window,
        }
    }

    fn window_start(&self, now: SystemTime) -> SystemTime {
        now.checked_sub(self.window).unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Returns `true` iff `account` may attempt another proof.
    pub(crate) fn check(&self, account: AccountId, now: SystemTime) -> bool {
        let start = self.window_start(now);
        let mut failures = self.failures.lock();
        match failures.get_mut(&account) {
            Some(attempts) => {
                attempts.retain(|attempt| *attempt > start);
                (attempts.len() as u32) < self.max_failures
            }
            None => true,
        }
    }

    /// Records a failed proof for `account`.
    pub(crate) fn record_failure(&self, account: AccountId, now: SystemTime) {
        self.failures.lock().entry(account).or_default().push(now);
    }

    /// Clears the failure history of `account` after a successful login.
    pub(crate) fn clear(&self, account: AccountId) {
        self.failures.lock().remove(&account);
    }

    /// Drops entries that slid out of every window.
    pub(crate) fn sweep(&self, now: SystemTime) {
        let start = self.window_start(now);
        let mut failures = self.failures.lock();
        failures.retain(|_, attempts| {
            attempts.retain(|attempt| *attempt > start);
            !attempts.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_trips_after_max_failures_and_slides() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let account = AccountId::generate();
        let now = SystemTime::now();

        for _ in 0..3 {
            assert!(limiter.check(account, now));
            limiter.record_failure(account, now);
        }
        assert!(!limiter.check(account, now));

        // outside the window the attempts no longer count
        let later = now + Duration::from_secs(61);
        assert!(limiter.check(account, later));
    }

    #[test]
    fn success_clears_the_history() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let account = AccountId::generate();
        let now = SystemTime::now();
        limiter.record_failure(account, now);
        assert!(!limiter.check(account, now));
        limiter.clear(account);
        assert!(limiter.check(account, now));
    }
}
