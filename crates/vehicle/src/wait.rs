//! Fixed-interval polling against a connection-wide shutdown flag.
//!
//! Convergence (parameter download, mission fetch, vehicle boot) is only
//! observable by re-reading state the dispatcher thread mutates, so waiters
//! poll instead of parking on a condition variable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    TimedOut,
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct Poller {
    interval: Duration,
    shutdown: Shutdown,
}

impl Poller {
    pub fn new(interval: Duration, shutdown: Shutdown) -> Self {
        Self { interval, shutdown }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Block until `done` holds (true) or shutdown is requested (false). No timeout.
    pub fn until(&self, mut done: impl FnMut() -> bool) -> bool {
        loop {
            if done() {
                return true;
            }
            if self.shutdown.is_set() {
                return false;
            }
            thread::sleep(self.interval);
        }
    }

    /// Like `until`, giving up after roughly `timeout`.
    pub fn within(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> PollOutcome {
        let attempts = (timeout.as_millis() / self.interval.as_millis().max(1)).max(1);
        for _ in 0..attempts {
            if done() {
                return PollOutcome::Ready;
            }
            if self.shutdown.is_set() {
                return PollOutcome::Shutdown;
            }
            thread::sleep(self.interval);
        }
        if done() { PollOutcome::Ready } else { PollOutcome::TimedOut }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn until_returns_false_on_shutdown() {
        let shutdown = Shutdown::new();
        let poller = Poller::new(Duration::from_millis(5), shutdown.clone());
        let flag = shutdown.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            flag.trigger();
        });
        assert!(!poller.until(|| false));
        t.join().unwrap();
    }

    #[test]
    fn within_times_out() {
        let poller = Poller::new(Duration::from_millis(10), Shutdown::new());
        let calls = AtomicUsize::new(0);
        let t0 = Instant::now();
        let out = poller.within(Duration::from_millis(50), || {
            calls.fetch_add(1, Ordering::SeqCst);
            false
        });
        assert_eq!(out, PollOutcome::TimedOut);
        assert!(t0.elapsed() >= Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn ready_condition_skips_sleep() {
        let poller = Poller::new(Duration::from_secs(10), Shutdown::new());
        let t0 = Instant::now();
        assert!(poller.until(|| true));
        assert_eq!(poller.within(Duration::from_secs(30), || true), PollOutcome::Ready);
        assert!(t0.elapsed() < Duration::from_secs(1));
    }
}
