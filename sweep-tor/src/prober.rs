//! Accessibility prober
//!
//! Probes one onion target through the transport and classifies the outcome.
//! Nothing is persisted here; the caller hands the result to the store.

use std::sync::Arc;
use tracing::debug;

use sweep_core::{ProbeResult, ProbeStatus, TargetEntry};

use crate::{FetchResponse, RetryPolicy, Transport, TransportError};

/// Statuses worth another attempt: rate limiting and transient server errors
const RETRY_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Probes targets under a retry policy
#[derive(Clone)]
pub struct Prober {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl Prober {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Probe a single target and classify the outcome
    pub async fn probe(&self, entry: &TargetEntry) -> ProbeResult {
        let url = entry.url();
        debug!("Testing accessibility: {}", entry.domain);

        let attempted = self
            .policy
            .run(
                |timeout| {
                    let url = url.clone();
                    let transport = Arc::clone(&self.transport);
                    async move {
                        let start = tokio::time::Instant::now();
                        let outcome = transport.fetch_status(&url, timeout).await;
                        (outcome, start.elapsed())
                    }
                },
                |(outcome, _)| should_retry(outcome),
            )
            .await;

        let (outcome, elapsed) = attempted.result;
        let result = classify(entry, outcome, elapsed.as_secs_f64());

        debug!(
            "{} -> {} after {} attempt(s)",
            entry.domain, result.status, attempted.attempts
        );
        result
    }
}

fn should_retry(outcome: &Result<FetchResponse, TransportError>) -> bool {
    match outcome {
        Ok(response) => RETRY_STATUSES.contains(&response.status),
        Err(e) => e.is_connection_failure(),
    }
}

/// Map the final attempt onto a probe result
fn classify(
    entry: &TargetEntry,
    outcome: Result<FetchResponse, TransportError>,
    fallback_elapsed: f64,
) -> ProbeResult {
    match outcome {
        Ok(response) => {
            let base = if response.is_success() || response.is_redirection() {
                ProbeResult::new(entry, ProbeStatus::Accessible)
            } else {
                ProbeResult::new(entry, ProbeStatus::Inaccessible)
                    .with_error(format!("HTTP {}", response.status))
            };
            base.with_http_status(response.status)
                .with_response_time(response.elapsed.as_secs_f64())
        }
        Err(e) if e.is_connection_failure() => ProbeResult::new(entry, ProbeStatus::Inaccessible)
            .with_error(e.to_string())
            .with_response_time(fallback_elapsed),
        Err(e) => ProbeResult::new(entry, ProbeStatus::Error)
            .with_error(e.to_string())
            .with_response_time(fallback_elapsed),
    }
}
