/// Circuit Breaker - Failure Tracking Guard for the Execution Backend
///
/// **States:**
/// - Closed: calls pass through, consecutive failures are counted
/// - Open: calls are rejected without touching the backend
/// - HalfOpen: recovery timeout elapsed, calls pass through as probes
///
/// **Transitions:**
/// ```text
/// Closed   → Open:     failure_count >= failure_threshold
/// Open     → HalfOpen: recovery_timeout elapsed since last failure (checked on call)
/// HalfOpen → Closed:   a probe succeeds
/// HalfOpen → Open:     a probe fails (timer re-armed)
/// ```
///
/// **Concurrency:**
/// One mutex guards state, counter and timestamp. It is never held across
/// the wrapped operation, so every read-modify-write is atomic while calls
/// themselves overlap freely.
///
/// HalfOpen does not limit probes to a single in-flight call: every call
/// admitted during HalfOpen runs, and their outcomes race to close or
/// reopen the breaker.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::BreakerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// Any `Err` from the operation counts as one failure; an `Ok` counts as
    /// one success. When the breaker is open the future is dropped without
    /// ever being polled.
    pub async fn call<Fut, T, E>(&self, operation: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            return Err(BreakerError::Open);
        }

        match operation.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Decide whether a call may proceed, moving Open → HalfOpen once the
    /// recovery timeout has passed
    fn admit(&self) -> bool {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner.last_failure.map(|at| at.elapsed());
            match elapsed {
                Some(elapsed) if elapsed >= self.recovery_timeout => {
                    info!(
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Circuit breaker entering HALF_OPEN state"
                    );
                    inner.state = CircuitState::HalfOpen;
                    inner.failure_count = 0;
                }
                // Open without a timestamp only happens through external
                // bookkeeping; treat it as freshly opened.
                _ => {
                    warn!("Circuit breaker is OPEN, rejecting request");
                    return false;
                }
            }
        }

        true
    }

    /// Record one successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker probe succeeded, closing breaker");
            inner.state = CircuitState::Closed;
            inner.last_failure = None;
        }
    }

    /// Record one failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            error!(
                failure_count = inner.failure_count,
                threshold = self.failure_threshold,
                from = %inner.state,
                "Circuit breaker OPENED"
            );
            inner.state = CircuitState::Open;
        } else {
            warn!(
                failure_count = inner.failure_count,
                threshold = self.failure_threshold,
                state = %inner.state,
                "Circuit breaker recorded failure"
            );
        }
    }

    /// Force Closed with a zero counter and no failure timestamp
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        info!("Circuit breaker manually reset");
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().state == CircuitState::Open
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }
}
