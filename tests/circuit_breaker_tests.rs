use service_gateway::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use service_gateway::store::{MemoryStore, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn breaker(config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    Arc::new(CircuitBreaker::new(config, store))
}

fn fast_recovery() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        minimum_requests: 3,
        recovery_timeout_secs: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_circuit_breaker_lifecycle() {
    let cb = breaker(fast_recovery());
    let service = "orders";

    assert_eq!(cb.state(service), CircuitState::Closed);

    for _ in 0..3 {
        assert!(cb.permit(service).allowed);
        cb.record_response(service, 503, Duration::from_millis(15));
    }

    assert_eq!(cb.state(service), CircuitState::Open);
    assert!(!cb.permit(service).allowed);

    sleep(Duration::from_millis(1100)).await;

    // Exactly one trial request is let through
    let trial = cb.permit(service);
    assert!(trial.allowed);
    assert_eq!(trial.state, CircuitState::HalfOpen);
    assert!(!cb.permit(service).allowed);

    cb.record_response(service, 200, Duration::from_millis(15));

    assert_eq!(cb.state(service), CircuitState::Closed);
    assert_eq!(cb.status(service).stats.consecutive_failures, 0);
    assert!(cb.permit(service).allowed);
}

#[tokio::test]
async fn test_half_open_failure_reopens_circuit() {
    let cb = breaker(fast_recovery());
    let service = "payments";

    for _ in 0..3 {
        cb.record_error(service, "connection refused", Duration::from_millis(5));
    }
    assert_eq!(cb.state(service), CircuitState::Open);

    sleep(Duration::from_millis(1100)).await;
    assert!(cb.permit(service).allowed);
    assert_eq!(cb.state(service), CircuitState::HalfOpen);

    cb.record_error(service, "connection refused", Duration::from_millis(5));
    assert_eq!(cb.state(service), CircuitState::Open);

    // The recovery clock restarts from the reopening
    assert!(!cb.permit(service).allowed);
    let status = cb.status(service);
    assert!(status.next_attempt_at.unwrap() > status.state_changed_at.unwrap());
}

#[tokio::test]
async fn test_services_do_not_share_state() {
    let cb = breaker(fast_recovery());

    for _ in 0..3 {
        cb.record_response("orders", 500, Duration::from_millis(5));
        cb.record_response("catalog", 200, Duration::from_millis(5));
    }

    assert_eq!(cb.state("orders"), CircuitState::Open);
    assert_eq!(cb.state("catalog"), CircuitState::Closed);
    assert!(cb.permit("catalog").allowed);
}

#[tokio::test]
async fn test_concurrent_outcomes_are_not_lost() {
    let cb = breaker(CircuitBreakerConfig {
        minimum_requests: 1_000_000,
        ..Default::default()
    });

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let cb = cb.clone();
            tokio::spawn(async move {
                for _ in 0..250 {
                    assert!(cb.permit("orders").allowed);
                    cb.record_outcome("orders", i % 2 == 0, 10, None);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    let stats = cb.status("orders").stats;
    assert_eq!(stats.total_requests, 4000);
    assert_eq!(stats.successful_requests, 2000);
    assert_eq!(stats.failed_requests, 2000);
    assert_eq!(stats.total_response_time_ms, 20_000);
}

#[tokio::test]
async fn test_concurrent_half_open_admits_one_trial() {
    let cb = breaker(CircuitBreakerConfig {
        failure_threshold: 1,
        minimum_requests: 1,
        recovery_timeout_secs: 0,
        ..Default::default()
    });
    cb.record_outcome("orders", false, 10, None);
    assert_eq!(cb.state("orders"), CircuitState::Open);

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let cb = cb.clone();
            tokio::spawn(async move { cb.permit("orders").allowed })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 1);
    assert_eq!(cb.status("orders").stats.rejected_requests, 31);
}

#[tokio::test]
async fn test_recent_failures_keep_latest_hundred() {
    let cb = breaker(CircuitBreakerConfig {
        minimum_requests: 1_000_000,
        ..Default::default()
    });

    for i in 0..120 {
        cb.record_error("orders", &format!("failure {}", i), Duration::from_millis(1));
    }

    let stats = cb.status("orders").stats;
    assert_eq!(stats.recent_failures.len(), 100);
    assert_eq!(
        stats.recent_failures.front().unwrap().detail.as_deref(),
        Some("failure 20")
    );
    assert_eq!(
        stats.recent_failures.back().unwrap().detail.as_deref(),
        Some("failure 119")
    );
}
