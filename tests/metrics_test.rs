use axum::body::Body;
use http::{Request, StatusCode};
use serde_json::json;
use service_gateway::{
    build_app, build_state,
    config::GatewayConfig,
    discovery::{InstanceAddress, StaticServiceConfig},
    metrics::MetricsService,
};
use std::collections::HashMap;
use tower::ServiceExt;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

// The Prometheus recorder is process-global, so this file holds a single test
#[tokio::test]
async fn test_metrics_endpoint_exposes_gateway_metrics() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = GatewayConfig::default_config();
    config.services.insert(
        "orders".to_string(),
        StaticServiceConfig::Single(InstanceAddress {
            host: server.address().ip().to_string(),
            port: server.address().port(),
            id: None,
            scheme: "http".to_string(),
            metadata: HashMap::new(),
        }),
    );
    config.circuit_breaker.minimum_requests = 1;
    config.circuit_breaker.failure_threshold = 1;

    let metrics = MetricsService::new().unwrap();
    let app = build_app(build_state(config).unwrap(), Some(metrics));

    for _ in 0..2 {
        app.clone()
            .oneshot(
                Request::builder()
                    .uri("/api/orders/items")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
    }

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("gateway_requests_total"));
    assert!(text.contains(r#"service="orders""#));
    assert!(text.contains("gateway_circuit_breaker_transitions_total"));
    assert!(text.contains("gateway_circuit_breaker_rejections_total"));
    assert!(text.contains("gateway_instance_probe_total"));
}
