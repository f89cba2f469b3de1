//! Countdown barrier over the shared store.
//!
//! A coordinator dispatches N fire-and-forget jobs, then waits for N
//! signals under one key. Each job signals exactly once with its own job
//! id; the signal list carries a TTL so keys orphaned by a dead
//! coordinator are reclaimed by the store.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::Limits;
use crate::store::KvStore;

/// Key a waiter's signals collect under.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WaiterKey(String);

impl WaiterKey {
    pub fn generate() -> Self {
        Self(format!("waiter:{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WaiterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a wait observed: the job ids that signaled, and how many signals
/// never arrived before the timeout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaitOutcome {
    pub finished: Vec<String>,
    pub remaining: usize,
}

impl WaitOutcome {
    pub fn complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Store-backed countdown barrier.
///
/// Carries no completion policy of its own: on timeout the caller gets an
/// honest partial count and decides whether to proceed, fail, or re-wait.
#[derive(Clone)]
pub struct JobWaiter {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    poll_interval: Duration,
}

impl JobWaiter {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            ttl: Self::DEFAULT_TTL,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_timing(store: Arc<dyn KvStore>, ttl: Duration, poll_interval: Duration) -> Self {
        Self {
            store,
            ttl,
            poll_interval,
        }
    }

    pub fn from_limits(store: Arc<dyn KvStore>, limits: &Limits) -> Self {
        Self::with_timing(
            store,
            Duration::from_millis(limits.waiter_ttl_ms),
            Duration::from_millis(limits.waiter_poll_interval_ms),
        )
    }

    /// Record one job's completion under `key`. Best-effort: a store
    /// failure is logged, and the coordinator's timeout covers the lost
    /// signal.
    pub fn notify(&self, key: &WaiterKey, job_id: &str) {
        if let Err(err) = self.store.list_push(key.as_str(), job_id, self.ttl) {
            tracing::warn!(key = %key, job_id, error = %err, "waiter signal lost");
        }
    }

    /// Poll until `expected` signals arrived under `key` or `timeout`
    /// elapsed, whichever is first.
    pub fn wait(&self, key: &WaiterKey, expected: usize, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut finished = Vec::with_capacity(expected);

        loop {
            match self.store.list_take(key.as_str(), expected - finished.len()) {
                Ok(values) => finished.extend(values),
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "waiter poll failed");
                }
            }
            if finished.len() >= expected {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }

        WaitOutcome {
            remaining: expected - finished.len(),
            finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn waiter() -> JobWaiter {
        JobWaiter::with_timing(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(10),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn collects_all_expected_signals() {
        let waiter = waiter();
        let key = WaiterKey::generate();

        waiter.notify(&key, "job-1");
        waiter.notify(&key, "job-2");
        waiter.notify(&key, "job-3");

        let outcome = waiter.wait(&key, 3, Duration::from_secs(1));
        assert!(outcome.complete());
        assert_eq!(outcome.finished, vec!["job-1", "job-2", "job-3"]);
    }

    #[test]
    fn timeout_reports_partial_completion() {
        let waiter = waiter();
        let key = WaiterKey::generate();

        waiter.notify(&key, "job-1");

        let outcome = waiter.wait(&key, 3, Duration::from_millis(40));
        assert!(!outcome.complete());
        assert_eq!(outcome.finished, vec!["job-1"]);
        assert_eq!(outcome.remaining, 2);
    }

    #[test]
    fn unblocks_on_signals_from_other_threads() {
        let waiter = waiter();
        let key = WaiterKey::generate();

        let signal_waiter = waiter.clone();
        let signal_key = key.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..3 {
                std::thread::sleep(Duration::from_millis(10));
                signal_waiter.notify(&signal_key, &format!("job-{i}"));
            }
        });

        let outcome = waiter.wait(&key, 3, Duration::from_secs(2));
        assert!(outcome.complete());
        assert_eq!(outcome.finished.len(), 3);
        handle.join().unwrap();
    }

    #[test]
    fn zero_expected_completes_immediately() {
        let waiter = waiter();
        let key = WaiterKey::generate();
        let outcome = waiter.wait(&key, 0, Duration::from_secs(1));
        assert!(outcome.complete());
        assert!(outcome.finished.is_empty());
    }
}
