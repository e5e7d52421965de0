use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use crate::logger::{benchmark, Event, Level, Logger};
use crate::transport::{Transport, TransportRequest, TransportResponse};
use crate::Error;

/// Status-driven retry policy with geometric backoff.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub retry_count: u32,
    /// Delay before the second retry.
    pub base_interval: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    pub retryable_status_codes: BTreeSet<u16>,
}

impl RetryPolicy {
    /// Returns `true` when `status` should be retried.
    pub fn is_retryable(&self, status: StatusCode) -> bool {
        self.retryable_status_codes.contains(&status.as_u16())
    }

    /// Delay before the `retry`-th retry (1-based).
    ///
    /// The first retry is immediate; retry `n > 1` waits
    /// `base_interval * multiplier^(n-1)`.
    pub fn delay(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let seconds = self.base_interval.as_secs_f64() * self.multiplier.powi(exponent);
        // Odd powers of a negative multiplier give a negative product.
        if seconds.is_nan() || seconds <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }
}

/// Suspends the calling thread between retries.
pub trait Sleeper: Send + Sync {
    /// Blocks for `duration`.
    fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] using `std::thread::sleep`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

#[derive(Debug, Default)]
struct RetryState {
    attempt_count: u32,
}

/// Submits a request to the transport and retries on retryable statuses.
///
/// Transport failures are never retried: a refused or timed-out exchange
/// may already have been partially sent.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    transport: Arc<dyn Transport>,
    logger: Arc<dyn Logger>,
    sleeper: Arc<dyn Sleeper>,
    metric_prefix: String,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("metric_prefix", &self.metric_prefix)
            .finish()
    }
}

impl RetryExecutor {
    /// Creates an executor sending through `transport`.
    pub fn new(
        policy: RetryPolicy,
        transport: Arc<dyn Transport>,
        logger: Arc<dyn Logger>,
        sleeper: Arc<dyn Sleeper>,
        metric_prefix: impl Into<String>,
    ) -> Self {
        Self {
            policy,
            transport,
            logger,
            sleeper,
            metric_prefix: metric_prefix.into(),
        }
    }

    /// Policy in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `request` until a non-retryable response arrives or retries run
    /// out.
    ///
    /// Any response whose status is outside the retryable set is returned,
    /// successful or not.
    pub fn execute(
        &self,
        action: &str,
        request: &TransportRequest,
    ) -> Result<TransportResponse, Error> {
        let verb = request.verb;
        let mut state = RetryState::default();

        loop {
            let response = self.attempt(action, request)?;
            if !self.policy.is_retryable(response.status) {
                return Ok(response);
            }

            let code = response.status.as_u16();
            if state.attempt_count >= self.policy.retry_count {
                let message = format!(
                    "HTTP {verb}: {action} Failure: ({code}) {}. Retries Exhausted",
                    response.message
                );
                self.logger
                    .error(&Event::new(&message).metric(&self.metric("exception")));
                return Err(Error::RetriesExhausted {
                    status: code,
                    message,
                });
            }

            state.attempt_count += 1;
            let delay = self.policy.delay(state.attempt_count);
            let message = format!(
                "HTTP {verb}: {action} Failure: ({code}) {}. Retry: {}",
                response.message, state.attempt_count
            );
            self.logger.warn(
                &Event::new(&message)
                    .metric(&self.metric("retry"))
                    .duration(delay),
            );
            self.sleeper.sleep(delay);
        }
    }

    fn attempt(
        &self,
        action: &str,
        request: &TransportRequest,
    ) -> Result<TransportResponse, Error> {
        let payload = self
            .logger
            .is_trace()
            .then(|| json!({ "path": request.path }));
        let message = self
            .logger
            .is_debug()
            .then(|| format!("HTTP {}: {action}", request.verb));
        let metric = self.metric(action);

        let mut event = Event::default().metric(&metric);
        event.message = message.as_deref();
        event.payload = payload.as_ref();

        benchmark(self.logger.as_ref(), Level::INFO, event, || {
            self.transport.execute(request)
        })
        .map_err(|err| {
            let message = format!("HTTP {}: {action} Failure: {err}", request.verb);
            self.logger.error(
                &Event::new(&message)
                    .metric(&self.metric("exception"))
                    .error(&err),
            );
            Error::Transport {
                message,
                source: err,
            }
        })
    }

    fn metric(&self, name: &str) -> String {
        format!("{}/{name}", self.metric_prefix)
    }
}
