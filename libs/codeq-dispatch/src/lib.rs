//! Admission-controlled execution queue for remote code execution.
//!
//! Requests enter through [`QueueManager::submit`], wait in a bounded
//! admission queue, and are dispatched to short-lived workers. Each worker
//! passes the concurrency gate, then runs the executor call through the
//! retry policy inside the shared [`CircuitBreaker`], and records a terminal
//! outcome in the [`ResultStore`].

pub mod breaker;
pub mod error;
pub mod executor;
pub mod piston;
pub mod queue;
pub mod retry;
pub mod store;

#[cfg(test)]
mod test_support;

pub use breaker::{CircuitBreaker, CircuitState};
pub use error::{BreakerError, DispatchError, ExecutorError};
pub use executor::CodeExecutor;
pub use piston::PistonExecutor;
pub use queue::QueueManager;
pub use retry::RetryPolicy;
pub use store::ResultStore;
