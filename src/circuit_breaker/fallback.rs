use super::types::{CircuitBreakerConfig, CircuitRecord};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

/// Substitute response served when a service cannot be reached
#[derive(Debug, Clone)]
pub struct FallbackResponse {
    pub status: StatusCode,
    pub body: Value,
    pub retry_after_secs: u64,
}

impl FallbackResponse {
    /// Build the fallback for `service` from its current breaker record.
    ///
    /// A configured per-service override wins. Otherwise the generic
    /// unavailable payload is returned, with breaker diagnostics attached
    /// when `include_diagnostics` is set.
    pub fn build(
        config: &CircuitBreakerConfig,
        service: &str,
        record: &CircuitRecord,
        include_diagnostics: bool,
        error_detail: Option<&str>,
    ) -> Self {
        if let Some(fallback) = config.fallbacks.get(service) {
            return Self {
                status: StatusCode::from_u16(fallback.status)
                    .unwrap_or(StatusCode::SERVICE_UNAVAILABLE),
                body: fallback.body.clone(),
                retry_after_secs: config.retry_after_secs,
            };
        }

        let mut body = json!({
            "error": "Service temporarily unavailable",
            "message": format!(
                "The {} service is currently unavailable. Please try again later.",
                service
            ),
            "service": service,
            "circuitState": record.state,
            "retryAfter": config.retry_after_secs,
            "timestamp": Utc::now().to_rfc3339(),
        });

        if include_diagnostics {
            let stats = &record.stats;
            body["diagnostics"] = json!({
                "consecutiveFailures": stats.consecutive_failures,
                "totalRequests": stats.total_requests,
                "failedRequests": stats.failed_requests,
                "lastFailureAt": stats.last_failure_at,
                "lastFailure": stats.recent_failures.back().and_then(|f| f.detail.clone()),
                "error": error_detail,
            });
        }

        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body,
            retry_after_secs: config.retry_after_secs,
        }
    }
}

impl IntoResponse for FallbackResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::types::{CircuitState, FallbackOverride, FailureRecord};

    fn open_record() -> CircuitRecord {
        let mut record = CircuitRecord::default();
        record.transition(CircuitState::Open, Utc::now());
        record.stats.total_requests = 10;
        record.stats.failed_requests = 5;
        record.stats.consecutive_failures = 5;
        record.stats.last_failure_at = Some(Utc::now());
        record.stats.push_failure(
            FailureRecord {
                at: Utc::now(),
                response_time_ms: 12,
                detail: Some("connection refused".to_string()),
            },
            100,
        );
        record
    }

    #[test]
    fn test_generic_payload() {
        let config = CircuitBreakerConfig::default();
        let fallback = FallbackResponse::build(&config, "orders", &open_record(), false, None);

        assert_eq!(fallback.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(fallback.retry_after_secs, 300);
        assert_eq!(fallback.body["error"], "Service temporarily unavailable");
        assert_eq!(fallback.body["service"], "orders");
        assert_eq!(fallback.body["circuitState"], "OPEN");
        assert_eq!(fallback.body["retryAfter"], 300);
        assert!(fallback.body.get("diagnostics").is_none());
    }

    #[test]
    fn test_diagnostics_outside_production() {
        let config = CircuitBreakerConfig::default();
        let fallback = FallbackResponse::build(
            &config,
            "orders",
            &open_record(),
            true,
            Some("operation timed out"),
        );

        let diagnostics = &fallback.body["diagnostics"];
        assert_eq!(diagnostics["consecutiveFailures"], 5);
        assert_eq!(diagnostics["totalRequests"], 10);
        assert_eq!(diagnostics["failedRequests"], 5);
        assert_eq!(diagnostics["lastFailure"], "connection refused");
        assert_eq!(diagnostics["error"], "operation timed out");
    }

    #[test]
    fn test_configured_override_wins() {
        let mut config = CircuitBreakerConfig::default();
        config.fallbacks.insert(
            "catalog".to_string(),
            FallbackOverride {
                status: 200,
                body: json!({"products": [], "cached": true}),
            },
        );

        let fallback =
            FallbackResponse::build(&config, "catalog", &CircuitRecord::default(), true, None);
        assert_eq!(fallback.status, StatusCode::OK);
        assert_eq!(fallback.body, json!({"products": [], "cached": true}));
    }

    #[test]
    fn test_response_carries_retry_after() {
        let config = CircuitBreakerConfig::default();
        let response =
            FallbackResponse::build(&config, "orders", &open_record(), false, None).into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "300");
    }
}
