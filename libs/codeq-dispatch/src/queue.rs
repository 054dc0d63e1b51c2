/// Queue Manager - Admission, Dispatch and Bookkeeping
///
/// **Responsibility:**
/// Accept execution requests, protect the execution backend from overload,
/// and keep terminal outcomes around long enough for callers to poll them.
///
/// **Architecture:**
/// 1. `submit` pushes into a bounded admission queue (rejects with QueueFull)
/// 2. A single dispatch loop drains the queue and spawns one worker per
///    request without waiting for capacity
/// 3. Each worker passes the concurrency gate, then runs
///    CircuitBreaker(RetryPolicy(CodeExecutor)) and records the terminal
///    outcome in the ResultStore
///
/// **Two independent bounds:**
/// - `max_queue_size` limits requests not yet dispatched
/// - `max_concurrent` limits requests executing against the backend
///
/// Requests leave the queue in submission order, but completion order is
/// whatever the backend produces. Callers correlate by execution id.

use codeq_common::config::{ConfigError, DispatchConfig};
use codeq_common::types::{ExecutionOutcome, ExecutionRequest, QueueStatus};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::breaker::CircuitBreaker;
use crate::error::{BreakerError, DispatchError, ExecutorError};
use crate::executor::CodeExecutor;
use crate::retry::RetryPolicy;
use crate::store::ResultStore;

type RequestReceiver = mpsc::Receiver<ExecutionRequest>;

pub struct QueueManager {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

/// State every worker needs; outlives the manager while workers drain
struct Shared {
    config: DispatchConfig,
    sender: mpsc::Sender<ExecutionRequest>,
    gate: Semaphore,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    store: ResultStore,
    executor: Arc<dyn CodeExecutor>,
    stats: Stats,
}

#[derive(Default)]
struct Stats {
    active: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

struct Lifecycle {
    /// Parked here while the dispatch loop is not running
    receiver: Option<RequestReceiver>,
    running: Option<Running>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    dispatcher: JoinHandle<RequestReceiver>,
    sweeper: Option<JoinHandle<()>>,
}

impl QueueManager {
    pub fn new(
        config: DispatchConfig,
        executor: Arc<dyn CodeExecutor>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(config.max_queue_size);
        let shared = Shared {
            gate: Semaphore::new(config.max_concurrent),
            breaker: CircuitBreaker::new(config.failure_threshold, config.recovery_timeout),
            retry: RetryPolicy::new(config.max_retries, config.backoff_unit),
            store: ResultStore::new(config.result_ttl),
            sender,
            executor,
            stats: Stats::default(),
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
            lifecycle: Mutex::new(Lifecycle {
                receiver: Some(receiver),
                running: None,
            }),
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.shared.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.shared.breaker
    }

    /// Start the background dispatch loop (and the sweeper, if configured).
    /// Calling it on a running manager does nothing.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.running.is_some() {
            debug!("Queue manager already running");
            return;
        }

        let Some(receiver) = lifecycle.receiver.take() else {
            error!("Admission queue receiver lost, dispatch loop cannot start");
            return;
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = tokio::spawn(dispatch_loop(
            self.shared.clone(),
            receiver,
            shutdown_rx.clone(),
        ));
        let sweeper = self
            .shared
            .config
            .cleanup_interval
            .map(|every| tokio::spawn(sweep_loop(self.shared.clone(), every, shutdown_rx)));

        lifecycle.running = Some(Running {
            shutdown,
            dispatcher,
            sweeper,
        });

        info!(
            max_concurrent = self.shared.config.max_concurrent,
            max_queue_size = self.shared.config.max_queue_size,
            max_retries = self.shared.config.max_retries,
            "Queue manager started"
        );
    }

    /// Stop dispatching and wait for the loop to exit.
    ///
    /// Workers already dispatched run to completion before this returns.
    /// Requests still waiting in the admission queue stay there and are
    /// picked up by the next `start`.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.running.take() else {
            return;
        };

        // Receivers may already be gone if a task died; nothing to signal then
        let _ = running.shutdown.send(true);

        match running.dispatcher.await {
            Ok(receiver) => lifecycle.receiver = Some(receiver),
            Err(e) => error!(error = %e, "Dispatch loop terminated abnormally"),
        }

        if let Some(sweeper) = running.sweeper {
            if let Err(e) = sweeper.await {
                warn!(error = %e, "Result sweeper terminated abnormally");
            }
        }

        info!("Queue manager stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.running.is_some()
    }

    /// Enqueue a request without waiting.
    ///
    /// Returns the execution id (the caller's, or a generated one).
    pub fn submit(
        &self,
        code: impl Into<String>,
        language: impl Into<String>,
        stdin: impl Into<String>,
        execution_id: Option<String>,
    ) -> Result<String, DispatchError> {
        let request = ExecutionRequest::new(execution_id, code, language, stdin);
        let execution_id = request.id.clone();
        let language = request.language.clone();

        match self.shared.sender.try_send(request) {
            Ok(()) => {
                info!(
                    execution_id = %execution_id,
                    language = %language,
                    pending = self.shared.pending_count(),
                    "Queued execution"
                );
                Ok(execution_id)
            }
            Err(TrySendError::Full(_)) => {
                let capacity = self.shared.config.max_queue_size;
                error!(
                    execution_id = %execution_id,
                    pending = capacity,
                    "Queue full, rejecting execution"
                );
                Err(DispatchError::QueueFull { capacity })
            }
            Err(TrySendError::Closed(_)) => Err(DispatchError::ShuttingDown),
        }
    }

    /// Terminal outcome for `execution_id`, if recorded and not yet expired.
    ///
    /// `None` covers both "still pending" and "expired".
    pub fn get_result(&self, execution_id: &str) -> Option<ExecutionOutcome> {
        self.shared.store.cleanup_expired();
        self.shared.store.get(execution_id)
    }

    pub fn get_status(&self) -> QueueStatus {
        let stats = &self.shared.stats;
        QueueStatus {
            pending_count: self.shared.pending_count(),
            active_count: stats.active.load(Ordering::SeqCst),
            completed_count: stats.completed.load(Ordering::SeqCst),
            failed_count: stats.failed.load(Ordering::SeqCst),
            circuit_breaker_open: self.shared.breaker.is_open(),
        }
    }

    pub fn reset_breaker(&self) {
        self.shared.breaker.reset();
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        // Best effort - cannot await here. Signalling shutdown lets the loop
        // drain its workers and exit instead of polling forever.
        if let Some(running) = self.lifecycle.get_mut().running.take() {
            let _ = running.shutdown.send(true);
        }
    }
}

impl Shared {
    fn pending_count(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// One request, start to finish. Never panics outward: every path ends
    /// with a terminal outcome in the store and the gate released.
    #[instrument(skip(self, request), fields(execution_id = %request.id))]
    async fn process(self: Arc<Self>, mut request: ExecutionRequest) {
        let execution_id = request.id.clone();

        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("Concurrency gate closed");
                self.finish(
                    execution_id,
                    ExecutionOutcome::runtime_failure("Unexpected error: concurrency gate closed"),
                    false,
                );
                return;
            }
        };
        let _active = ActiveGuard::enter(&self.stats.active);
        debug!(active = self.stats.active.load(Ordering::SeqCst), "Executing");

        let guarded = self.breaker.call(self.retry.execute_with_retry(
            self.executor.as_ref(),
            &mut request,
            self.config.execution_timeout,
        ));

        let caught = AssertUnwindSafe(guarded).catch_unwind().await;

        let (outcome, completed) = match caught {
            Ok(Ok(outcome)) => (outcome, true),
            Ok(Err(BreakerError::Open)) => {
                warn!("Circuit breaker open, execution not attempted");
                (
                    ExecutionOutcome::runtime_failure(BreakerError::<ExecutorError>::Open.to_string()),
                    false,
                )
            }
            Ok(Err(BreakerError::Inner(e))) => {
                error!(error = %e, retries = request.retry_count, "Execution backend unreachable");
                (ExecutionOutcome::runtime_failure(e.to_string()), false)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Unexpected error during execution");
                (
                    ExecutionOutcome::runtime_failure(format!("Unexpected error: {}", message)),
                    false,
                )
            }
        };

        self.finish(execution_id, outcome, completed);
    }

    fn finish(&self, execution_id: String, outcome: ExecutionOutcome, completed: bool) {
        info!(
            success = outcome.success,
            timed_out = outcome.timed_out,
            completed,
            execution_ms = outcome.execution_time_ms,
            "Execution finished"
        );

        self.store.put(execution_id, outcome);
        if completed {
            self.stats.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.stats.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Active-count guard - decrements on every exit path, panics included
struct ActiveGuard<'a> {
    active: &'a AtomicUsize,
}

impl<'a> ActiveGuard<'a> {
    fn enter(active: &'a AtomicUsize) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Drain the admission queue until told to stop, then wait for every worker
/// it spawned. Hands the receiver back so the manager can be restarted.
async fn dispatch_loop(
    shared: Arc<Shared>,
    mut receiver: RequestReceiver,
    mut shutdown: watch::Receiver<bool>,
) -> RequestReceiver {
    info!("Dispatch loop started");
    let mut workers = JoinSet::new();
    let poll_interval = shared.config.poll_interval;

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = shutdown.changed() => break,

            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Worker task failed");
                }
            }

            next = tokio::time::timeout(poll_interval, receiver.recv()) => match next {
                Ok(Some(request)) => {
                    debug!(execution_id = %request.id, "Dequeued execution");
                    workers.spawn(shared.clone().process(request));
                }
                // Every sender is gone; nothing more can arrive
                Ok(None) => break,
                // Idle - loop around and re-check the stop flag
                Err(_) => continue,
            },
        }
    }

    if !workers.is_empty() {
        info!(in_flight = workers.len(), "Waiting for in-flight executions");
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Worker task failed");
        }
    }

    info!("Dispatch loop stopped");
    receiver
}

/// Periodic result sweep, on top of the sweep done by every read
async fn sweep_loop(shared: Arc<Shared>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                shared.store.cleanup_expired();
            }
        }
    }
    debug!("Result sweeper stopped");
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod queue_tests;
