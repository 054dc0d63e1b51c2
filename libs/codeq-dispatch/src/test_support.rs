// In-process executor fakes shared by the unit and scenario tests

use async_trait::async_trait;
use codeq_common::types::ExecutionOutcome;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::ExecutorError;
use crate::executor::CodeExecutor;

type Scripted = Result<ExecutionOutcome, ExecutorError>;

/// Replays a fixed script of results; the last entry repeats forever
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Scripted>>,
    delay: Duration,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<Scripted>) -> Self {
        assert!(!script.is_empty(), "script needs at least one entry");
        Self {
            script: Mutex::new(script.into()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(result: Scripted) -> Self {
        Self::new(vec![result])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Time between consecutive calls
    pub fn gaps(&self) -> Vec<Duration> {
        let times = self.call_times.lock();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn next(&self) -> Scripted {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap()
        }
    }
}

#[async_trait]
impl CodeExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _code: &str,
        _language: &str,
        _stdin: &str,
        _timeout: Duration,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().push(Instant::now());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.next()
    }
}

/// Succeeds after sleeping for the number of milliseconds written in the
/// source (`"sleep 250"`), echoing the source as output. Tracks how many
/// calls overlap.
#[derive(Default)]
pub struct SleepyExecutor {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl SleepyExecutor {
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeExecutor for SleepyExecutor {
    async fn execute(
        &self,
        code: &str,
        _language: &str,
        _stdin: &str,
        _timeout: Duration,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let ms = code
            .strip_prefix("sleep ")
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ExecutionOutcome::success(code, Duration::from_millis(ms)))
    }
}

/// Panics on every call
pub struct PanickingExecutor;

#[async_trait]
impl CodeExecutor for PanickingExecutor {
    async fn execute(
        &self,
        _code: &str,
        _language: &str,
        _stdin: &str,
        _timeout: Duration,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        panic!("executor exploded");
    }
}
