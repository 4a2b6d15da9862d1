//! Administrative HTTP interface: breaker inspection and reset, service
//! listing, discovery controls and a read-only view of the configuration.

use crate::circuit_breaker::CircuitStatus;
use crate::proxy::ProxyState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::info;

/// One row of the service listing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub name: String,
    /// Present in the static configuration
    pub configured: bool,
    pub circuit: CircuitStatus,
}

#[derive(Debug, Deserialize)]
pub struct HighLoadRequest {
    pub enabled: bool,
}

/// Routes mounted under `/admin` plus the gateway liveness check
pub fn admin_routes() -> Router<ProxyState> {
    Router::new()
        .route("/health", get(health))
        .route("/admin/services", get(list_services))
        .route("/admin/circuit-breakers", get(list_circuit_breakers))
        .route("/admin/circuit-breakers/:service", get(circuit_breaker_status))
        .route(
            "/admin/circuit-breakers/:service/reset",
            post(reset_circuit_breaker),
        )
        .route("/admin/config", get(gateway_config))
        .route("/admin/discovery/high-load", put(set_high_load))
        .route("/admin/discovery/cache/:service", delete(invalidate_cache))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn list_services(State(state): State<ProxyState>) -> impl IntoResponse {
    let configured: BTreeSet<String> = state.discovery.configured_services().into_iter().collect();
    let known: BTreeSet<String> = configured
        .iter()
        .cloned()
        .chain(
            state
                .circuit_breaker
                .all_statuses()
                .into_iter()
                .map(|status| status.service),
        )
        .collect();

    let services: Vec<ServiceSummary> = known
        .into_iter()
        .map(|name| ServiceSummary {
            configured: configured.contains(&name),
            circuit: state.circuit_breaker.status(&name),
            name,
        })
        .collect();

    Json(json!({
        "discoveryMethod": state.discovery.method(),
        "highLoad": state.discovery.is_high_load(),
        "services": services,
    }))
}

async fn list_circuit_breakers(State(state): State<ProxyState>) -> impl IntoResponse {
    Json(state.circuit_breaker.all_statuses())
}

async fn circuit_breaker_status(
    State(state): State<ProxyState>,
    Path(service): Path<String>,
) -> impl IntoResponse {
    Json(state.circuit_breaker.status(&service))
}

async fn reset_circuit_breaker(
    State(state): State<ProxyState>,
    Path(service): Path<String>,
) -> impl IntoResponse {
    info!(service = %service, "Circuit breaker reset requested");
    let status = state.circuit_breaker.reset(&service);

    Json(json!({
        "message": format!("Circuit breaker for {} has been reset", service),
        "status": status,
    }))
}

async fn gateway_config(State(state): State<ProxyState>) -> impl IntoResponse {
    Json(state.config.as_ref().clone())
}

async fn set_high_load(
    State(state): State<ProxyState>,
    Json(request): Json<HighLoadRequest>,
) -> impl IntoResponse {
    state.discovery.set_high_load(request.enabled);
    Json(json!({ "highLoad": state.discovery.is_high_load() }))
}

async fn invalidate_cache(
    State(state): State<ProxyState>,
    Path(service): Path<String>,
) -> impl IntoResponse {
    state.discovery.invalidate(&service);
    info!(service = %service, "Discovery cache invalidated");
    StatusCode::NO_CONTENT
}
