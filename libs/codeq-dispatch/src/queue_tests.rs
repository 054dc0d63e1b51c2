/// Scenario tests for the queue manager
///
/// These drive the full path: submit → dispatch loop → gate → breaker →
/// retry → executor fake → result store. All run on a paused clock, so
/// sleeps, backoff and recovery timeouts advance instantly and
/// deterministically.

use super::*;
use crate::test_support::{PanickingExecutor, ScriptedExecutor, SleepyExecutor};
use crate::error::ExecutorError;

fn fast_config() -> DispatchConfig {
    DispatchConfig {
        backoff_unit: Duration::from_millis(10),
        poll_interval: Duration::from_millis(50),
        ..DispatchConfig::default()
    }
}

/// Poll until the outcome shows up (paused clock, so this is instant)
async fn wait_for_result(manager: &QueueManager, execution_id: &str) -> ExecutionOutcome {
    for _ in 0..100_000 {
        if let Some(outcome) = manager.get_result(execution_id) {
            return outcome;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no result for {}", execution_id);
}

#[tokio::test(start_paused = true)]
async fn test_admission_bound() {
    let config = DispatchConfig {
        max_queue_size: 3,
        ..fast_config()
    };
    let executor = Arc::new(SleepyExecutor::default());
    let manager = QueueManager::new(config, executor.clone()).unwrap();

    // Not started: nothing drains the queue
    for i in 0..3 {
        manager.submit("sleep 1", "python", "", Some(format!("exec_{}", i))).unwrap();
    }
    assert_eq!(
        manager.submit("sleep 1", "python", "", None),
        Err(DispatchError::QueueFull { capacity: 3 })
    );
    assert_eq!(manager.get_status().pending_count, 3);
    assert_eq!(executor.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_admission_frees_up_once_dispatched() {
    let config = DispatchConfig {
        max_queue_size: 1,
        ..fast_config()
    };
    let manager = QueueManager::new(config, Arc::new(SleepyExecutor::default())).unwrap();

    let first = manager.submit("sleep 5", "python", "", None).unwrap();
    assert!(manager.submit("sleep 5", "python", "", None).is_err());

    manager.start().await;
    wait_for_result(&manager, &first).await;

    let second = manager.submit("sleep 5", "python", "", None).unwrap();
    assert!(wait_for_result(&manager, &second).await.success);
    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_caller_supplied_id_is_used() {
    let manager = QueueManager::new(fast_config(), Arc::new(SleepyExecutor::default())).unwrap();
    manager.start().await;

    let id = manager
        .submit("sleep 1", "python", "", Some("question-42".to_string()))
        .unwrap();
    assert_eq!(id, "question-42");

    let outcome = wait_for_result(&manager, "question-42").await;
    assert_eq!(outcome.output, "sleep 1");
    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bound_scenario() {
    let config = DispatchConfig {
        max_concurrent: 2,
        max_queue_size: 10,
        ..fast_config()
    };
    let executor = Arc::new(SleepyExecutor::default());
    let manager = QueueManager::new(config, executor.clone()).unwrap();
    manager.start().await;

    let ids: Vec<String> = (0..5)
        .map(|_| manager.submit("sleep 100", "python", "", None).unwrap())
        .collect();

    let mut max_active = 0;
    loop {
        let status = manager.get_status();
        assert!(status.active_count <= 2, "active {} > 2", status.active_count);
        max_active = max_active.max(status.active_count);
        if status.completed_count == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for id in &ids {
        assert!(manager.get_result(id).unwrap().success);
    }
    assert_eq!(max_active, 2);
    assert_eq!(executor.max_in_flight(), 2);

    let status = manager.get_status();
    assert_eq!(status.active_count, 0);
    assert_eq!(status.failed_count, 0);
    assert_eq!(status.pending_count, 0);
    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_completion_order_can_differ_from_submission_order() {
    let config = DispatchConfig {
        max_concurrent: 2,
        ..fast_config()
    };
    let manager = QueueManager::new(config, Arc::new(SleepyExecutor::default())).unwrap();
    manager.start().await;

    let slow = manager.submit("sleep 500", "python", "", None).unwrap();
    let fast = manager.submit("sleep 50", "python", "", None).unwrap();

    wait_for_result(&manager, &fast).await;
    assert!(manager.get_result(&slow).is_none(), "slow request finished first");

    wait_for_result(&manager, &slow).await;
    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_breaker_scenario_through_queue() {
    let config = DispatchConfig {
        max_retries: 0,
        failure_threshold: 3,
        recovery_timeout: Duration::from_secs(1),
        ..fast_config()
    };
    let down = || Err(ExecutorError::Transport("connection refused".into()));
    let executor = Arc::new(ScriptedExecutor::new(vec![
        down(),
        down(),
        down(),
        Ok(ExecutionOutcome::success("back", Duration::from_millis(1))),
    ]));
    let manager = QueueManager::new(config, executor.clone()).unwrap();
    manager.start().await;

    for _ in 0..3 {
        let id = manager.submit("print(1)", "python", "", None).unwrap();
        let outcome = wait_for_result(&manager, &id).await;
        assert!(!outcome.success);
        assert_eq!(outcome.runtime_error, "network error: connection refused");
    }
    assert!(manager.get_status().circuit_breaker_open);

    // Rejected without reaching the executor
    let id = manager.submit("print(1)", "python", "", None).unwrap();
    let outcome = wait_for_result(&manager, &id).await;
    assert!(outcome.runtime_error.contains("circuit breaker is open"));
    assert_eq!(executor.calls(), 3);

    let status = manager.get_status();
    assert_eq!(status.failed_count, 4);
    assert_eq!(status.completed_count, 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let id = manager.submit("print(1)", "python", "", None).unwrap();
    let outcome = wait_for_result(&manager, &id).await;
    assert!(outcome.success);
    assert_eq!(executor.calls(), 4);
    assert_eq!(manager.breaker().state(), crate::breaker::CircuitState::Closed);
    assert!(!manager.get_status().circuit_breaker_open);
    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_program_counts_as_completed_and_does_not_trip_breaker() {
    let config = DispatchConfig {
        max_retries: 1,
        failure_threshold: 1,
        ..fast_config()
    };
    let executor = Arc::new(ScriptedExecutor::repeating(Ok(
        ExecutionOutcome::compile_failure("main.cpp:1: error: expected ';'"),
    )));
    let manager = QueueManager::new(config, executor.clone()).unwrap();
    manager.start().await;

    let id = manager.submit("int main(", "cpp", "", None).unwrap();
    let outcome = wait_for_result(&manager, &id).await;

    assert!(!outcome.success);
    assert_eq!(outcome.compile_error, "main.cpp:1: error: expected ';'");
    assert_eq!(executor.calls(), 2, "one retry");
    let status = manager.get_status();
    assert_eq!(status.completed_count, 1);
    assert!(!status.circuit_breaker_open);
    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_outcome_is_recorded_without_retry() {
    let config = DispatchConfig {
        max_retries: 4,
        ..fast_config()
    };
    let executor = Arc::new(ScriptedExecutor::repeating(Ok(ExecutionOutcome::timed_out(
        Duration::from_secs(10),
    ))));
    let manager = QueueManager::new(config, executor.clone()).unwrap();
    manager.start().await;

    let id = manager.submit("while True: pass", "python", "", None).unwrap();
    let outcome = wait_for_result(&manager, &id).await;

    assert!(outcome.timed_out);
    assert_eq!(executor.calls(), 1);
    assert_eq!(manager.get_status().completed_count, 1);
    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_worker_panic_is_contained_and_gate_released() {
    let config = DispatchConfig {
        max_concurrent: 1,
        ..fast_config()
    };
    let manager = QueueManager::new(config, Arc::new(PanickingExecutor)).unwrap();
    manager.start().await;

    let ids: Vec<String> = (0..3)
        .map(|_| manager.submit("boom", "python", "", None).unwrap())
        .collect();

    for id in &ids {
        let outcome = wait_for_result(&manager, id).await;
        assert!(!outcome.success);
        assert_eq!(outcome.runtime_error, "Unexpected error: executor exploded");
    }

    let status = manager.get_status();
    assert_eq!(status.failed_count, 3);
    assert_eq!(status.active_count, 0);
    assert_eq!(manager.shared.gate.available_permits(), 1);
    assert!(manager.is_running().await, "dispatch loop survived");
    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_result_expires_after_ttl() {
    let config = DispatchConfig {
        result_ttl: Duration::from_secs(5),
        ..fast_config()
    };
    let manager = QueueManager::new(config, Arc::new(SleepyExecutor::default())).unwrap();
    manager.start().await;

    let id = manager.submit("sleep 1", "python", "", None).unwrap();
    wait_for_result(&manager, &id).await;

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(manager.get_result(&id).is_some());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(manager.get_result(&id).is_none());
    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_periodic_sweeper_evicts_without_reads() {
    let config = DispatchConfig {
        result_ttl: Duration::from_secs(2),
        cleanup_interval: Some(Duration::from_secs(1)),
        ..fast_config()
    };
    let manager = QueueManager::new(config, Arc::new(SleepyExecutor::default())).unwrap();
    manager.start().await;

    manager.submit("sleep 1", "python", "", None).unwrap();
    while manager.get_status().completed_count == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(manager.shared.store.len(), 1);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(manager.shared.store.is_empty());
    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_in_flight_and_leaves_queue_intact() {
    let config = DispatchConfig {
        max_concurrent: 1,
        ..fast_config()
    };
    let executor = Arc::new(SleepyExecutor::default());
    let manager = QueueManager::new(config, executor.clone()).unwrap();
    manager.start().await;

    let running = manager.submit("sleep 300", "python", "", None).unwrap();
    while manager.get_status().active_count == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    manager.stop().await;
    assert!(!manager.is_running().await);
    assert!(manager.get_result(&running).unwrap().success);

    // Admitted while stopped: stays pending until restarted
    let parked = manager.submit("sleep 1", "python", "", None).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(manager.get_result(&parked).is_none());
    assert_eq!(manager.get_status().pending_count, 1);

    manager.start().await;
    assert!(wait_for_result(&manager, &parked).await.success);
    assert_eq!(executor.calls(), 2);
    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_and_stop_are_idempotent() {
    let manager = QueueManager::new(fast_config(), Arc::new(SleepyExecutor::default())).unwrap();

    manager.stop().await;
    manager.start().await;
    manager.start().await;
    assert!(manager.is_running().await);

    let id = manager.submit("sleep 1", "python", "", None).unwrap();
    wait_for_result(&manager, &id).await;

    manager.stop().await;
    manager.stop().await;
    assert!(!manager.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn test_reset_breaker() {
    let config = DispatchConfig {
        max_retries: 0,
        failure_threshold: 1,
        recovery_timeout: Duration::from_secs(3600),
        ..fast_config()
    };
    let executor = Arc::new(ScriptedExecutor::new(vec![
        Err(ExecutorError::Status {
            status: 503,
            body: "overloaded".into(),
        }),
        Ok(ExecutionOutcome::success("fine", Duration::from_millis(1))),
    ]));
    let manager = QueueManager::new(config, executor).unwrap();
    manager.start().await;

    let id = manager.submit("x", "python", "", None).unwrap();
    wait_for_result(&manager, &id).await;
    assert!(manager.get_status().circuit_breaker_open);

    manager.reset_breaker();
    assert!(!manager.get_status().circuit_breaker_open);

    let id = manager.submit("x", "python", "", None).unwrap();
    assert!(wait_for_result(&manager, &id).await.success);
    manager.stop().await;
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = DispatchConfig {
        max_concurrent: 0,
        ..DispatchConfig::default()
    };
    assert!(QueueManager::new(config, Arc::new(SleepyExecutor::default())).is_err());
}

#[test]
fn test_oversized_capacity_is_rejected_without_panicking() {
    let config = DispatchConfig {
        max_queue_size: usize::MAX,
        ..DispatchConfig::default()
    };
    assert!(QueueManager::new(config, Arc::new(SleepyExecutor::default())).is_err());

    let config = DispatchConfig {
        max_concurrent: usize::MAX,
        ..DispatchConfig::default()
    };
    assert!(matches!(
        QueueManager::new(config, Arc::new(SleepyExecutor::default())),
        Err(ConfigError::OutOfRange { reason: "too large", .. })
    ));
}
