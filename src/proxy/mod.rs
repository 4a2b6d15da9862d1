use crate::circuit_breaker::{CircuitBreaker, FallbackResponse, Permit};
use crate::config::GatewayConfig;
use crate::discovery::{ServiceDiscovery, ServiceInstance};
use crate::error::{GatewayError, Result};
use crate::loadbalancer::LoadBalancer;
use crate::metrics;
use crate::observability::{RequestId, REQUEST_ID_HEADER};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
    response::{IntoResponse, Response},
    Extension,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const GATEWAY_REQUEST_ID_HEADER: &str = "x-gateway-request-id";
pub const GATEWAY_TIMESTAMP_HEADER: &str = "x-gateway-timestamp";
pub const GATEWAY_SERVICE_HEADER: &str = "x-gateway-service";
pub const GATEWAY_INSTANCE_HEADER: &str = "x-gateway-instance";
pub const RESPONSE_TIME_HEADER: &str = "x-response-time";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLES_HEADER: &str = "x-user-roles";

/// Authenticated caller, inserted as a request extension by an upstream auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub roles: Vec<String>,
}

/// A request addressed to a logical service
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub service: String,
    /// Downstream path, empty or starting with `/`
    pub path: String,
    pub query: Option<String>,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub caller: Option<CallerIdentity>,
    /// Inbound request id, if the caller supplied or middleware assigned one
    pub request_id: Option<String>,
}

impl ProxyRequest {
    fn target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

/// Proxy handler state
#[derive(Clone)]
pub struct ProxyState {
    pub discovery: Arc<ServiceDiscovery>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub load_balancer: Arc<LoadBalancer>,
    pub client: reqwest::Client,
    pub config: Arc<GatewayConfig>,
}

impl ProxyState {
    /// Create a new proxy state
    pub fn new(
        config: GatewayConfig,
        discovery: ServiceDiscovery,
        circuit_breaker: CircuitBreaker,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.server.timeout())
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            discovery: Arc::new(discovery),
            circuit_breaker: Arc::new(circuit_breaker),
            load_balancer: Arc::new(LoadBalancer::new(&config.load_balancer)),
            client,
            config: Arc::new(config),
        })
    }

    /// Run a request through discovery, the breaker and the balancer, then forward it
    pub async fn handle(&self, req: ProxyRequest) -> Response {
        let timer = metrics::Timer::new(&req.service, req.method.as_str());
        let gateway_request_id = Uuid::new_v4().to_string();

        info!(
            service = %req.service,
            method = %req.method,
            path = %req.path,
            request_id = %gateway_request_id,
            "Incoming request"
        );

        let (mut response, instance) = self.dispatch(&req, &gateway_request_id).await;

        decorate_response(
            &mut response,
            &gateway_request_id,
            &req.service,
            instance.as_deref(),
            timer.elapsed(),
        );
        timer.record(response.status().as_u16());

        response
    }

    async fn dispatch(
        &self,
        req: &ProxyRequest,
        gateway_request_id: &str,
    ) -> (Response, Option<String>) {
        if !is_supported_method(&req.method) {
            warn!(method = %req.method, "Rejecting unsupported method");
            return (
                GatewayError::InvalidMethod(req.method.to_string()).into_response(),
                None,
            );
        }

        let instances = self.discovery.resolve(&req.service).await;
        if instances.is_empty() {
            warn!(service = %req.service, "No healthy instances available");
            return (
                GatewayError::NoHealthyInstances(req.service.clone()).into_response(),
                None,
            );
        }

        let permit = self.circuit_breaker.permit(&req.service);
        if !permit.allowed {
            let rejection = GatewayError::CircuitOpen(req.service.clone());
            warn!(
                service = %req.service,
                state = %permit.state,
                status = %rejection.status_code(),
                error = %rejection,
                "Circuit breaker rejected request, serving fallback"
            );
            return (self.fallback(&req.service, None).into_response(), None);
        }

        let trial = TrialGuard::new(&self.circuit_breaker, &req.service, &permit);
        let instance = self.load_balancer.pick(&req.service, &instances);
        let headers = self.outbound_headers(req, gateway_request_id);

        let started = Instant::now();
        let result = self.forward(instance, req, headers).await;
        let elapsed = started.elapsed();
        trial.complete();

        match result {
            Ok(response) => {
                let status = response.status();
                let state =
                    self.circuit_breaker
                        .record_response(&req.service, status.as_u16(), elapsed);

                info!(
                    service = %req.service,
                    instance = %instance.id,
                    status = %status,
                    latency_ms = elapsed.as_millis() as u64,
                    circuit_state = %state,
                    "Request completed"
                );

                (response, Some(instance.id.clone()))
            }
            Err(e) => {
                let detail = e.to_string();
                self.circuit_breaker
                    .record_error(&req.service, &detail, elapsed);

                error!(
                    service = %req.service,
                    path = %req.path,
                    instance = %instance.id,
                    error = %detail,
                    "Downstream request failed"
                );

                (
                    self.fallback(&req.service, Some(&detail)).into_response(),
                    Some(instance.id.clone()),
                )
            }
        }
    }

    fn fallback(&self, service: &str, error_detail: Option<&str>) -> FallbackResponse {
        let include_diagnostics = !self.config.environment.is_production();
        self.circuit_breaker
            .fallback(service, include_diagnostics, error_detail)
    }

    /// Headers sent to the downstream instance
    fn outbound_headers(&self, req: &ProxyRequest, gateway_request_id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for name in [header::AUTHORIZATION, header::CONTENT_TYPE] {
            if let Some(value) = req.headers.get(&name) {
                headers.insert(name, value.clone());
            }
        }

        insert_header(&mut headers, GATEWAY_REQUEST_ID_HEADER, gateway_request_id);
        insert_header(
            &mut headers,
            REQUEST_ID_HEADER,
            req.request_id.as_deref().unwrap_or(gateway_request_id),
        );
        insert_header(
            &mut headers,
            GATEWAY_TIMESTAMP_HEADER,
            &Utc::now().to_rfc3339(),
        );

        if let Some(caller) = &req.caller {
            insert_header(&mut headers, USER_ID_HEADER, &caller.user_id);
            insert_header(&mut headers, USER_ROLES_HEADER, &caller.roles.join(","));
        }

        headers
    }

    /// Send the request to the instance and buffer the response
    async fn forward(
        &self,
        instance: &ServiceInstance,
        req: &ProxyRequest,
        headers: HeaderMap,
    ) -> Result<Response> {
        let url = format!("{}{}", instance.url, req.target());
        debug!(url = %url, "Forwarding to instance");

        let downstream = self
            .client
            .request(req.method.clone(), &url)
            .headers(headers)
            .body(req.body.clone())
            .send()
            .await?;

        let mut builder = axum::http::Response::builder().status(downstream.status());
        for (name, value) in downstream.headers() {
            if !is_hop_by_hop_header(name.as_str()) && name != header::CONTENT_LENGTH {
                builder = builder.header(name, value);
            }
        }

        let body = downstream.bytes().await?;

        builder
            .body(Body::from(body))
            .map_err(|e| GatewayError::Internal(format!("Failed to build response: {}", e)))
    }
}

/// Releases a half-open trial slot when the request is abandoned before its outcome is recorded
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    service: &'a str,
    trial_slot: Option<DateTime<Utc>>,
}

impl<'a> TrialGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, service: &'a str, permit: &Permit) -> Self {
        Self {
            breaker,
            service,
            trial_slot: permit.trial_slot,
        }
    }

    fn complete(mut self) {
        self.trial_slot = None;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if let Some(trial_slot) = self.trial_slot.take() {
            self.breaker.release_trial(self.service, trial_slot);
        }
    }
}

/// Axum handler for `/api/:service` and `/api/:service/*path`
pub async fn proxy_handler(
    State(state): State<ProxyState>,
    caller: Option<Extension<CallerIdentity>>,
    request_id: Option<Extension<RequestId>>,
    req: Request,
) -> Response {
    let (parts, body) = req.into_parts();

    let Some(service) = service_name(parts.uri.path()) else {
        return GatewayError::NoHealthyInstances(String::new()).into_response();
    };

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return GatewayError::Internal(format!("Failed to read request body: {}", e))
                .into_response()
        }
    };

    let request = ProxyRequest {
        service,
        path: downstream_path(parts.uri.path()),
        query: parts.uri.query().map(str::to_string),
        method: parts.method,
        headers: parts.headers,
        body,
        caller: caller.map(|Extension(identity)| identity),
        request_id: request_id.map(|Extension(RequestId(id))| id),
    };

    state.handle(request).await
}

/// Service segment of `/api/{service}/...`
fn service_name(uri_path: &str) -> Option<String> {
    uri_path
        .split('/')
        .nth(2)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Remainder of `/api/{service}/...`, forwarded verbatim to the instance
fn downstream_path(uri_path: &str) -> String {
    match uri_path.splitn(4, '/').nth(3) {
        Some(rest) => format!("/{}", rest),
        None => String::new(),
    }
}

fn is_supported_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET
            | Method::POST
            | Method::PUT
            | Method::PATCH
            | Method::DELETE
            | Method::HEAD
            | Method::OPTIONS
    )
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(_) => warn!(header = name, "Skipping header with invalid value"),
    }
}

/// Add gateway tracing and timing headers to a response
fn decorate_response(
    response: &mut Response,
    gateway_request_id: &str,
    service: &str,
    instance: Option<&str>,
    elapsed: Duration,
) {
    let headers = response.headers_mut();
    insert_header(headers, GATEWAY_REQUEST_ID_HEADER, gateway_request_id);
    insert_header(
        headers,
        RESPONSE_TIME_HEADER,
        &format!("{}ms", elapsed.as_millis()),
    );
    insert_header(headers, GATEWAY_SERVICE_HEADER, service);
    if let Some(instance) = instance {
        insert_header(headers, GATEWAY_INSTANCE_HEADER, instance);
    }
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
