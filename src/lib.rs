pub mod admin;
pub mod circuit_breaker;
pub mod config;
pub mod discovery;
pub mod error;
pub mod loadbalancer;
pub mod metrics;
pub mod observability;
pub mod proxy;
pub mod store;

pub use observability::init_tracing;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::GatewayConfig;
use crate::discovery::ServiceDiscovery;
use crate::error::{GatewayError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::proxy::{proxy_handler, ProxyState};
use crate::store::{MemoryStore, StateStore};
use axum::{middleware, routing::any, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Wire discovery, the circuit breaker and the proxy around one shared in-memory store
pub fn build_state(config: GatewayConfig) -> Result<ProxyState> {
    config.validate()?;

    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let discovery = ServiceDiscovery::new(
        config.discovery.clone(),
        config.services.clone(),
        store.clone(),
    )?;
    let circuit_breaker = CircuitBreaker::new(config.circuit_breaker.clone(), store);

    ProxyState::new(config, discovery, circuit_breaker)
}

/// Build the HTTP application: proxy routes, admin routes and optionally `/metrics`
pub fn build_app(state: ProxyState, metrics: Option<MetricsService>) -> Router {
    let mut app = Router::new()
        .route("/api/:service", any(proxy_handler))
        .route("/api/:service/*path", any(proxy_handler))
        .merge(admin::admin_routes())
        .with_state(state);

    if let Some(metrics) = metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        );
    }

    app.layer(middleware::from_fn(observability::request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(observability::make_request_span))
}

/// Initialize the gateway server
pub async fn init_gateway(config: GatewayConfig) -> Result<()> {
    info!(
        environment = ?config.environment,
        discovery = %config.discovery.method,
        services = config.services.len(),
        "Starting service gateway"
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = build_state(config)?;
    let metrics = MetricsService::new()?;
    let app = build_app(state, Some(metrics));

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, "Gateway ready to accept connections");

    axum::serve(listener, app)
        .await
        .map_err(|e| GatewayError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
