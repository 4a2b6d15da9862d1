use crate::error::{GatewayError, Result};
use crate::metrics;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Probes a single instance and reports whether it is healthy.
///
/// Implementations never fail: any error degrades to `false`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, instance_url: &str) -> bool;
}

/// HTTP health prober with a bounded timeout
pub struct HttpHealthProber {
    client: reqwest::Client,
    health_path: String,
}

impl std::fmt::Debug for HttpHealthProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHealthProber")
            .field("health_path", &self.health_path)
            .field("client", &"<reqwest::Client>")
            .finish()
    }
}

impl HttpHealthProber {
    /// Create a new prober
    pub fn new(timeout: Duration, health_path: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                GatewayError::Config(format!("Failed to create health probe client: {}", e))
            })?;

        Ok(Self {
            client,
            health_path: health_path.into(),
        })
    }

    fn health_url(&self, instance_url: &str) -> String {
        format!("{}{}", instance_url.trim_end_matches('/'), self.health_path)
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProber {
    async fn probe(&self, instance_url: &str) -> bool {
        let url = self.health_url(instance_url);
        debug!(url = %url, "Probing instance health");

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Health probe failed: request error");
                metrics::record_probe(false);
                return false;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Health probe failed: unexpected status");
            metrics::record_probe(false);
            return false;
        }

        let healthy = match response.bytes().await {
            Ok(body) => body_reports_healthy(&body),
            Err(e) => {
                warn!(url = %url, error = %e, "Health probe failed: unreadable body");
                metrics::record_probe(false);
                return false;
            }
        };

        if !healthy {
            warn!(url = %url, "Health probe failed: instance reported unhealthy status");
        }

        metrics::record_probe(healthy);
        healthy
    }
}

/// A structured body must carry `"status": "healthy"`; other bodies do not veto
fn body_reports_healthy(body: &[u8]) -> bool {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => match map.get("status") {
            Some(status) => status.as_str() == Some("healthy"),
            None => true,
        },
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_body_reports_healthy() {
        assert!(body_reports_healthy(br#"{"status":"healthy"}"#));
        assert!(!body_reports_healthy(br#"{"status":"degraded"}"#));
        assert!(body_reports_healthy(br#"{"uptime":42}"#));
        assert!(body_reports_healthy(b"OK"));
        assert!(body_reports_healthy(b""));
    }

    #[tokio::test]
    async fn test_probe_healthy_instance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "healthy"})),
            )
            .mount(&server)
            .await;

        let prober = HttpHealthProber::new(Duration::from_secs(3), "/health").unwrap();
        assert!(prober.probe(&server.uri()).await);
    }

    #[tokio::test]
    async fn test_probe_unhealthy_status_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "draining"})),
            )
            .mount(&server)
            .await;

        let prober = HttpHealthProber::new(Duration::from_secs(3), "/health").unwrap();
        assert!(!prober.probe(&server.uri()).await);
    }

    #[tokio::test]
    async fn test_probe_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let prober = HttpHealthProber::new(Duration::from_secs(3), "/health").unwrap();
        assert!(!prober.probe(&server.uri()).await);
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let prober = HttpHealthProber::new(Duration::from_millis(100), "/health").unwrap();
        assert!(!prober.probe(&server.uri()).await);
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let prober = HttpHealthProber::new(Duration::from_secs(1), "/health").unwrap();
        assert!(!prober.probe("http://127.0.0.1:1").await);
    }
}
