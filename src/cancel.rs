//! Cooperative cancellation for blocking store operations.
//!
//! A [`CancelToken`] is a shared flag plus an optional deadline. Clones share
//! the flag; [`CancelToken::child`] narrows the deadline without detaching
//! from the parent, so closing a store aborts every operation derived from
//! its token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Shared {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    shared: Arc<Shared>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that is only cancelled explicitly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also expires after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().child(Some(timeout))
    }

    /// A token sharing this one's flag, expiring at the earlier of the two
    /// deadlines.
    #[must_use]
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let own = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            shared: Arc::clone(&self.shared),
            deadline,
        }
    }

    /// Cancel this token and every token sharing its flag.
    pub fn cancel(&self) {
        let mut cancelled = self.shared.cancelled.lock();
        *cancelled = true;
        self.shared.wake.notify_all();
    }

    /// True once cancelled explicitly or past the deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.shared.cancelled.lock() || self.is_expired()
    }

    fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline, if there is one.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Clamp `wait` so it never outlives the deadline.
    #[must_use]
    pub fn bound(&self, wait: Duration) -> Duration {
        self.remaining().map_or(wait, |left| left.min(wait))
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the sleep was cut short by cancellation or the
    /// deadline.
    pub fn sleep(&self, duration: Duration) -> bool {
        let wake_at = Instant::now() + duration;
        let mut cancelled = self.shared.cancelled.lock();
        loop {
            if *cancelled || self.is_expired() {
                return true;
            }
            let now = Instant::now();
            if now >= wake_at {
                return false;
            }
            let until = match self.deadline {
                Some(d) => d.min(wake_at),
                None => wake_at,
            };
            self.shared.wake.wait_until(&mut cancelled, until);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.remaining(), None);
    }

    #[test]
    fn cancel_is_visible_through_clones_and_children() {
        let token = CancelToken::new();
        let clone = token.clone();
        let child = token.child(Some(Duration::from_secs(60)));
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_keeps_earlier_deadline() {
        let parent = CancelToken::with_timeout(Duration::from_millis(50));
        let child = parent.child(Some(Duration::from_secs(60)));
        let left = child.remaining().unwrap();
        assert!(left <= Duration::from_millis(50));
    }

    #[test]
    fn deadline_expires() {
        let token = CancelToken::with_timeout(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(20));
        assert!(token.is_cancelled());
    }

    #[test]
    fn sleep_runs_to_completion_without_cancel() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn sleep_wakes_on_cancel() {
        let token = CancelToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let start = Instant::now();
        assert!(token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn sleep_stops_at_deadline() {
        let token = CancelToken::with_timeout(Duration::from_millis(20));
        let start = Instant::now();
        assert!(token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn bound_clamps_to_deadline() {
        let token = CancelToken::with_timeout(Duration::from_millis(100));
        assert!(token.bound(Duration::from_secs(5)) <= Duration::from_millis(100));
        assert_eq!(
            CancelToken::new().bound(Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }
}
