//! Retry policy shared by listing fetches and probes
//!
//! The policy is plain data; [`RetryPolicy::run`] drives an operation under it.
//! Listing pages get a larger budget than probes since losing a page loses
//! every entry on it.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Attempt budget, per-attempt timeout and fixed backoff between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
    pub backoff: Duration,
}

/// Outcome of running an operation under a policy
#[derive(Debug)]
pub struct Attempted<T> {
    /// Result of the final attempt
    pub result: T,
    /// Attempts actually made
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, per_attempt_timeout: Duration, backoff: Duration) -> Self {
        Self {
            max_attempts,
            per_attempt_timeout,
            backoff,
        }
    }

    /// Default for listing pages
    pub fn listing() -> Self {
        Self::new(4, Duration::from_secs(60), Duration::from_secs(5))
    }

    /// Default for probing a target
    pub fn probe() -> Self {
        Self::new(2, Duration::from_secs(30), Duration::from_secs(2))
    }

    /// Budget with a floor of one attempt
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Run `op` until `retry` says stop or the budget runs out.
    ///
    /// `op` receives the per-attempt timeout. The backoff is slept between
    /// attempts only, never after the last one.
    pub async fn run<T, F, Fut, R>(&self, mut op: F, retry: R) -> Attempted<T>
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = T>,
        R: Fn(&T) -> bool,
    {
        let budget = self.attempts();
        let mut attempt = 1;

        loop {
            let result = op(self.per_attempt_timeout).await;

            if attempt >= budget || !retry(&result) {
                return Attempted {
                    result,
                    attempts: attempt,
                };
            }

            debug!("Attempt {}/{} failed, retrying in {:?}", attempt, budget, self.backoff);
            tokio::time::sleep(self.backoff).await;
            attempt += 1;
        }
    }
}
