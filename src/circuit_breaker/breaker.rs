use super::fallback::FallbackResponse;
use super::types::{
    CircuitBreakerConfig, CircuitRecord, CircuitState, CircuitStatus, FailureRecord, Permit,
};
use crate::metrics;
use crate::store::StateStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-service circuit breaker backed by the shared state store.
///
/// Every mutation of a service's record goes through
/// [`StateStore::update_circuit`], so concurrent requests for the same
/// service never lose updates.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    store: Arc<dyn StateStore>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(config: CircuitBreakerConfig, store: Arc<dyn StateStore>) -> Self {
        info!(
            failure_threshold = config.failure_threshold,
            failure_rate = config.failure_rate,
            minimum_requests = config.minimum_requests,
            recovery_timeout_secs = config.recovery_timeout_secs,
            "Creating circuit breaker"
        );

        Self { config, store }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether a request to `service` may proceed.
    ///
    /// An open circuit whose recovery is due flips to half-open before the
    /// trial request is admitted.
    pub fn permit(&self, service: &str) -> Permit {
        let now = Utc::now();
        let window = self.config.stats_window();
        let mut permit = Permit {
            allowed: true,
            state: CircuitState::Closed,
            trial_slot: None,
        };
        let mut transition = None;

        self.store.update_circuit(service, &mut |record| {
            record.stats.roll_window(now, window);

            permit = match record.state {
                CircuitState::Closed => Permit {
                    allowed: true,
                    state: CircuitState::Closed,
                    trial_slot: None,
                },
                CircuitState::Open if self.should_attempt_recovery(record, now) => {
                    record.transition(CircuitState::HalfOpen, now);
                    record.half_open_in_flight = 1;
                    transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                    Permit {
                        allowed: true,
                        state: CircuitState::HalfOpen,
                        trial_slot: record.state_changed_at,
                    }
                }
                CircuitState::Open => {
                    record.stats.rejected_requests += 1;
                    Permit {
                        allowed: false,
                        state: CircuitState::Open,
                        trial_slot: None,
                    }
                }
                CircuitState::HalfOpen
                    if record.half_open_in_flight < self.config.half_open_max_requests =>
                {
                    record.half_open_in_flight += 1;
                    Permit {
                        allowed: true,
                        state: CircuitState::HalfOpen,
                        trial_slot: record.state_changed_at,
                    }
                }
                CircuitState::HalfOpen => {
                    record.stats.rejected_requests += 1;
                    Permit {
                        allowed: false,
                        state: CircuitState::HalfOpen,
                        trial_slot: None,
                    }
                }
            };
        });

        if let Some((from, to)) = transition {
            self.log_transition(service, from, to);
        }

        if !permit.allowed {
            debug!(service = %service, state = %permit.state, "Circuit breaker rejecting request");
            metrics::record_circuit_rejection(service);
        }

        permit
    }

    /// Give back a half-open trial slot whose outcome will never be recorded.
    ///
    /// `trial_slot` is the [`Permit::trial_slot`] of the abandoned request. The
    /// slot is only returned while the circuit is still in that half-open period.
    pub fn release_trial(&self, service: &str, trial_slot: DateTime<Utc>) {
        let mut released = false;
        self.store.update_circuit(service, &mut |record| {
            if record.state == CircuitState::HalfOpen
                && record.state_changed_at == Some(trial_slot)
            {
                record.half_open_in_flight = record.half_open_in_flight.saturating_sub(1);
                released = true;
            }
        });

        if released {
            debug!(service = %service, "Released abandoned half-open trial");
        }
    }

    /// True when no transition time is recorded or the recovery timeout has elapsed.
    /// A recovery time beyond the representable range is never due.
    pub fn should_attempt_recovery(&self, record: &CircuitRecord, now: DateTime<Utc>) -> bool {
        match record.state_changed_at {
            None => true,
            Some(changed_at) => self
                .recovery_due_at(changed_at)
                .map_or(false, |due| now >= due),
        }
    }

    fn recovery_due_at(&self, changed_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        ChronoDuration::from_std(self.config.recovery_timeout())
            .ok()
            .and_then(|timeout| changed_at.checked_add_signed(timeout))
    }

    /// A response fails when its status is >= 400 or it exceeded `max_response_time_ms`
    pub fn is_failure(&self, status: u16, response_time_ms: u64) -> bool {
        status >= 400 || response_time_ms > self.config.max_response_time_ms
    }

    /// Record a downstream response, classifying it by status and latency
    pub fn record_response(&self, service: &str, status: u16, elapsed: Duration) -> CircuitState {
        let response_time_ms = elapsed.as_millis() as u64;

        if self.is_failure(status, response_time_ms) {
            let detail = if status >= 400 {
                format!("Downstream responded with status {}", status)
            } else {
                format!(
                    "Response time {}ms exceeded {}ms",
                    response_time_ms, self.config.max_response_time_ms
                )
            };
            self.record_outcome(service, false, response_time_ms, Some(detail))
        } else {
            self.record_outcome(service, true, response_time_ms, None)
        }
    }

    /// Record a forwarding error (network failure, timeout)
    pub fn record_error(&self, service: &str, detail: &str, elapsed: Duration) -> CircuitState {
        self.record_outcome(
            service,
            false,
            elapsed.as_millis() as u64,
            Some(detail.to_string()),
        )
    }

    /// Record the outcome of a request that reached the downstream
    pub fn record_outcome(
        &self,
        service: &str,
        success: bool,
        response_time_ms: u64,
        failure_detail: Option<String>,
    ) -> CircuitState {
        let now = Utc::now();
        let window = self.config.stats_window();
        let mut transition = None;
        let mut detail = failure_detail;

        let record = self.store.update_circuit(service, &mut |record| {
            record.stats.roll_window(now, window);

            // Any outcome recorded while half-open ends the period, and the
            // transition clears the trial slot count
            let was_half_open = record.state == CircuitState::HalfOpen;

            let stats = &mut record.stats;
            stats.total_requests += 1;
            stats.last_request_at = Some(now);

            if success {
                stats.successful_requests += 1;
                stats.total_response_time_ms += response_time_ms;
                stats.consecutive_failures = 0;
                stats.last_success_at = Some(now);

                if was_half_open {
                    record.transition(CircuitState::Closed, now);
                    record.stats.restart_window(now, window);
                    transition = Some((CircuitState::HalfOpen, CircuitState::Closed));
                } else {
                    // The failure rate can cross its threshold on a success
                    transition = self.evaluate(record, now);
                }
            } else {
                stats.failed_requests += 1;
                stats.consecutive_failures += 1;
                stats.last_failure_at = Some(now);
                stats.push_failure(
                    FailureRecord {
                        at: now,
                        response_time_ms,
                        detail: detail.take(),
                    },
                    self.config.max_recent_failures,
                );

                transition = self.evaluate(record, now);
            }
        });

        if let Some((from, to)) = transition {
            self.log_transition(service, from, to);
        }

        record.state
    }

    /// Apply the CLOSED -> OPEN and HALF_OPEN -> OPEN rules
    fn evaluate(
        &self,
        record: &mut CircuitRecord,
        now: DateTime<Utc>,
    ) -> Option<(CircuitState, CircuitState)> {
        let stats = &record.stats;

        match record.state {
            CircuitState::HalfOpen if stats.consecutive_failures > 0 => {
                record.transition(CircuitState::Open, now);
                Some((CircuitState::HalfOpen, CircuitState::Open))
            }
            CircuitState::Closed
                if stats.total_requests >= self.config.minimum_requests
                    && (stats.consecutive_failures >= self.config.failure_threshold
                        || stats.failure_rate() >= self.config.failure_rate) =>
            {
                record.transition(CircuitState::Open, now);
                Some((CircuitState::Closed, CircuitState::Open))
            }
            _ => None,
        }
    }

    /// Force the circuit closed and discard its statistics
    pub fn reset(&self, service: &str) -> CircuitStatus {
        let previous = self.store.circuit(service).state;
        self.store.reset_circuit(service);

        info!(service = %service, previous_state = %previous, "Circuit breaker reset");
        if previous != CircuitState::Closed {
            metrics::record_circuit_transition(service, previous, CircuitState::Closed);
        }
        metrics::record_circuit_state(service, CircuitState::Closed);

        self.status(service)
    }

    /// Get current state
    pub fn state(&self, service: &str) -> CircuitState {
        self.store.circuit(service).state
    }

    /// Get the current status of a service's breaker
    pub fn status(&self, service: &str) -> CircuitStatus {
        let mut record = self.store.circuit(service);
        let now = Utc::now();
        let window = self.config.stats_window();

        if record.stats.window_expired(now, window) {
            record.stats.restart_window(now, window);
        }

        let next_attempt_at = match (record.state, record.state_changed_at) {
            (CircuitState::Open, Some(changed_at)) => self.recovery_due_at(changed_at),
            _ => None,
        };

        CircuitStatus {
            service: service.to_string(),
            state: record.state,
            state_changed_at: record.state_changed_at,
            next_attempt_at,
            failure_rate: record.stats.failure_rate(),
            average_response_time_ms: record.stats.average_response_time_ms(),
            stats: record.stats,
        }
    }

    /// Status of every service the store holds a record for
    pub fn all_statuses(&self) -> Vec<CircuitStatus> {
        self.store
            .known_services()
            .iter()
            .map(|service| self.status(service))
            .collect()
    }

    /// Build the fallback response for a service that cannot be reached
    pub fn fallback(
        &self,
        service: &str,
        include_diagnostics: bool,
        error_detail: Option<&str>,
    ) -> FallbackResponse {
        let record = self.store.circuit(service);
        FallbackResponse::build(
            &self.config,
            service,
            &record,
            include_diagnostics,
            error_detail,
        )
    }

    fn log_transition(&self, service: &str, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(service = %service, from = %from, "Circuit breaker opening"),
            CircuitState::HalfOpen => info!(
                service = %service,
                recovery_timeout = ?self.config.recovery_timeout(),
                "Circuit breaker transitioning to half-open"
            ),
            CircuitState::Closed => info!(service = %service, from = %from, "Circuit breaker closing"),
        }

        metrics::record_circuit_transition(service, from, to);
        metrics::record_circuit_state(service, to);
    }
}
