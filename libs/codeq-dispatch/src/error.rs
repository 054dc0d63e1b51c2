use thiserror::Error;

/// Caller-visible failures of the queue manager itself
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("queue full: {capacity} requests already pending, try again shortly")]
    QueueFull { capacity: usize },

    #[error("queue manager is shutting down")]
    ShuttingDown,
}

/// Error surfaced by [`crate::CircuitBreaker::call`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// Downstream assumed unhealthy; the operation was not invoked
    #[error("circuit breaker is open, execution service temporarily unavailable")]
    Open,

    #[error(transparent)]
    Inner(E),
}

/// Transport-level failures reaching the execution backend.
///
/// A program that compiled or ran badly is not an `ExecutorError`; it is a
/// regular outcome with the error text filled in.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("network error: {0}")]
    Transport(String),

    #[error("executor API error: {status} - {body}")]
    Status { status: u16, body: String },
}
