use crate::error::{GatewayError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    #[default]
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, allowing a trial request
    HalfOpen,
}

impl CircuitState {
    /// Gauge value: 0 = closed, 1 = open, 2 = half-open
    pub fn as_gauge(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Static fallback served instead of the generic unavailable payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackOverride {
    #[serde(default = "default_fallback_status")]
    pub status: u16,
    pub body: serde_json::Value,
}

fn default_fallback_status() -> u16 {
    503
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Failure ratio (failed / total) that opens the circuit
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,

    /// Requests required in the window before the circuit may open
    #[serde(default = "default_minimum_requests")]
    pub minimum_requests: u64,

    /// Time spent open before a recovery attempt is allowed
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    /// Responses slower than this count as failures
    #[serde(default = "default_max_response_time_ms")]
    pub max_response_time_ms: u64,

    /// Retry-After hint on fallback responses
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,

    /// Concurrent trial requests admitted while half-open
    #[serde(default = "default_half_open_max_requests")]
    pub half_open_max_requests: u32,

    /// Rolling statistics window
    #[serde(default = "default_stats_window_secs")]
    pub stats_window_secs: u64,

    /// Capacity of the recent-failure log
    #[serde(default = "default_max_recent_failures")]
    pub max_recent_failures: usize,

    /// Per-service static fallback overrides
    #[serde(default)]
    pub fallbacks: HashMap<String, FallbackOverride>,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_failure_rate() -> f64 {
    0.5
}

fn default_minimum_requests() -> u64 {
    10
}

fn default_recovery_timeout_secs() -> u64 {
    3600
}

fn default_max_response_time_ms() -> u64 {
    5000
}

fn default_retry_after_secs() -> u64 {
    300
}

fn default_half_open_max_requests() -> u32 {
    1
}

fn default_stats_window_secs() -> u64 {
    86_400
}

fn default_max_recent_failures() -> usize {
    100
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_rate: default_failure_rate(),
            minimum_requests: default_minimum_requests(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            max_response_time_ms: default_max_response_time_ms(),
            retry_after_secs: default_retry_after_secs(),
            half_open_max_requests: default_half_open_max_requests(),
            stats_window_secs: default_stats_window_secs(),
            max_recent_failures: default_max_recent_failures(),
            fallbacks: HashMap::new(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn stats_window(&self) -> Duration {
        Duration::from_secs(self.stats_window_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(GatewayError::Config(
                "Circuit breaker failure_threshold must be > 0".to_string(),
            ));
        }

        if !(self.failure_rate > 0.0 && self.failure_rate <= 1.0) {
            return Err(GatewayError::Config(format!(
                "Circuit breaker failure_rate must be in (0, 1], got {}",
                self.failure_rate
            )));
        }

        if self.half_open_max_requests == 0 {
            return Err(GatewayError::Config(
                "Circuit breaker half_open_max_requests must be > 0".to_string(),
            ));
        }

        if self.stats_window_secs == 0 {
            return Err(GatewayError::Config(
                "Circuit breaker stats_window_secs must be > 0".to_string(),
            ));
        }

        for (service, fallback) in &self.fallbacks {
            if !(100..=599).contains(&fallback.status) {
                return Err(GatewayError::Config(format!(
                    "Invalid fallback status {} for service {}",
                    fallback.status, service
                )));
            }
        }

        Ok(())
    }
}

/// One entry of the recent-failure log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub response_time_ms: u64,
    pub detail: Option<String>,
}

/// Per-service request statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Requests shed by the breaker without a downstream call
    pub rejected_requests: u64,
    pub consecutive_failures: u32,
    pub total_response_time_ms: u64,
    pub last_request_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub recent_failures: VecDeque<FailureRecord>,
    pub window_started_at: Option<DateTime<Utc>>,
}

impl CircuitStats {
    /// Failed share of all requests in the window
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }

    /// Mean latency of successful requests
    pub fn average_response_time_ms(&self) -> Option<f64> {
        if self.successful_requests == 0 {
            None
        } else {
            Some(self.total_response_time_ms as f64 / self.successful_requests as f64)
        }
    }

    /// Append a failure, dropping the oldest entries beyond `capacity`
    pub fn push_failure(&mut self, failure: FailureRecord, capacity: usize) {
        self.recent_failures.push_back(failure);
        while self.recent_failures.len() > capacity {
            self.recent_failures.pop_front();
        }
    }

    /// Whether the window that started at `window_started_at` has elapsed
    pub fn window_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match (self.window_started_at, ChronoDuration::from_std(window)) {
            (Some(started), Ok(window)) => now - started >= window,
            _ => false,
        }
    }

    /// Start the window on first use and restart it once expired.
    /// Returns true when expired counters were discarded.
    pub fn roll_window(&mut self, now: DateTime<Utc>, window: Duration) -> bool {
        if self.window_started_at.is_none() {
            self.window_started_at = Some(now);
            return false;
        }

        if self.window_expired(now, window) {
            self.restart_window(now, window);
            return true;
        }

        false
    }

    /// Zero the counters; timestamps and failures younger than the window are kept
    pub fn restart_window(&mut self, now: DateTime<Utc>, window: Duration) {
        self.total_requests = 0;
        self.successful_requests = 0;
        self.failed_requests = 0;
        self.rejected_requests = 0;
        self.consecutive_failures = 0;
        self.total_response_time_ms = 0;
        self.window_started_at = Some(now);

        if let Ok(window) = ChronoDuration::from_std(window) {
            self.recent_failures
                .retain(|failure| now - failure.at < window);
        }
    }
}

/// Stored breaker state for one service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitRecord {
    pub state: CircuitState,
    /// Time of the last state transition
    pub state_changed_at: Option<DateTime<Utc>>,
    pub stats: CircuitStats,
    /// Trial requests admitted while half-open whose outcome is pending
    pub half_open_in_flight: u32,
}

impl CircuitRecord {
    pub fn transition(&mut self, to: CircuitState, now: DateTime<Utc>) {
        self.state = to;
        self.state_changed_at = Some(now);
        self.half_open_in_flight = 0;
    }
}

/// Result of asking the breaker whether a request may proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Permit {
    pub allowed: bool,
    pub state: CircuitState,
    /// Start of the half-open period whose trial slot this request holds
    pub trial_slot: Option<DateTime<Utc>>,
}

/// Breaker status as reported to administrators
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStatus {
    pub service: String,
    pub state: CircuitState,
    pub state_changed_at: Option<DateTime<Utc>>,
    /// Earliest time an open circuit admits a trial request
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub failure_rate: f64,
    pub average_response_time_ms: Option<f64>,
    pub stats: CircuitStats,
}
