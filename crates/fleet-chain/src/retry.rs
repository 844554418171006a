//! Bounded retry for read calls
//!
//! Reads are retried with exponential backoff while the transport reports
//! transient failures. Once `max_attempts` reads have failed the endpoint is
//! reported as unavailable. Submissions are never retried here.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;

use crate::error::{Error, Result, TransportError};
use crate::transport::{Call, Transport};
use crate::types::EndpointId;

/// How persistently reads are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy with near-zero delays, for tests and simulated endpoints
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Execute a read, retrying transient failures according to `policy`
pub async fn read_with_retry(
    transport: &dyn Transport,
    endpoint: &EndpointId,
    call: &Call,
    policy: &RetryPolicy,
) -> Result<Vec<u8>> {
    with_retry(endpoint, call.label(), policy, || transport.read(endpoint, call)).await
}

/// Run any read-like transport operation under `policy`
///
/// `op` is invoked once per attempt. Only [`TransportError::Transient`]
/// failures are retried.
pub async fn with_retry<T, F, Fut>(
    endpoint: &EndpointId,
    label: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, TransportError>>,
{
    let attempts = AtomicU32::new(0);
    let counter = &attempts;
    let max_attempts = policy.max_attempts.max(1);

    let outcome = backoff::future::retry(policy.backoff(), || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::debug!(
                        endpoint = %endpoint,
                        call = label,
                        attempt,
                        error = %e,
                        "Retrying read"
                    );
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await;

    outcome.map_err(|e| {
        if e.is_transient() {
            let attempts = attempts.load(Ordering::SeqCst);
            tracing::warn!(endpoint = %endpoint, call = label, attempts, "Endpoint unavailable");
            Error::EndpointUnavailable {
                endpoint: endpoint.clone(),
                attempts,
                message: e.to_string(),
            }
        } else {
            Error::transport(endpoint, e)
        }
    })
}
