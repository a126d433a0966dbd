//! Per-user sliding-window rate limiting.
//!
//! Counters live in process memory; a restart resets them, which the
//! contract accepts. The interface stays narrow so an external counter
//! could replace this without touching callers.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Production window: 30 executions per rolling 60 seconds.
pub const DEFAULT_MAX_EXECUTIONS: usize = 30;
/// Production window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limiter keyed by user.
pub struct RateLimiter {
    max_executions: usize,
    window: Duration,
    entries: Mutex<HashMap<Uuid, VecDeque<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EXECUTIONS, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    /// Limiter with a custom window (tests shrink it).
    #[must_use]
    pub fn new(max_executions: usize, window: Duration) -> Self {
        Self {
            max_executions,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Try to record one execution for the user.
    ///
    /// Returns `true` and counts the execution when under the limit;
    /// returns `false` without counting when over it.
    pub fn try_acquire(&self, user_id: Uuid) -> bool {
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let window = entries.entry(user_id).or_default();

        while window
            .front()
            .is_some_and(|&oldest| now.duration_since(oldest) >= self.window)
        {
            window.pop_front();
        }

        if window.len() >= self.max_executions {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Executions currently counted in the user's window.
    #[must_use]
    pub fn current_count(&self, user_id: Uuid) -> usize {
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(window) = entries.get_mut(&user_id) else {
            return 0;
        };
        while window
            .front()
            .is_some_and(|&oldest| now.duration_since(oldest) >= self.window)
        {
            window.pop_front();
        }
        window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_enforced() {
        let limiter = RateLimiter::new(30, Duration::from_secs(60));
        let user = Uuid::new_v4();

        for i in 0..30 {
            assert!(limiter.try_acquire(user), "execution {i} should pass");
        }
        // The 31st within the same window is rejected.
        assert!(!limiter.try_acquire(user));
        assert_eq!(limiter.current_count(user), 30);
    }

    #[test]
    fn test_rejected_attempts_do_not_count() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let user = Uuid::new_v4();

        assert!(limiter.try_acquire(user));
        assert!(limiter.try_acquire(user));
        for _ in 0..10 {
            assert!(!limiter.try_acquire(user));
        }
        assert_eq!(limiter.current_count(user), 2);
    }

    #[test]
    fn test_users_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        assert!(limiter.try_acquire(alice));
        assert!(!limiter.try_acquire(alice));
        assert!(limiter.try_acquire(bob));
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50));
        let user = Uuid::new_v4();

        assert!(limiter.try_acquire(user));
        assert!(limiter.try_acquire(user));
        assert!(!limiter.try_acquire(user));

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.try_acquire(user));
    }
}
