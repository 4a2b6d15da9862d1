use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::{debug_span, field, info, Span};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::LogFormat;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const DEFAULT_FILTER: &str = "service_gateway=debug,tower_http=debug";

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    match format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .with_current_span(true)
            .init(),
    }

    info!(format = ?format, "Tracing initialized");
}

/// Span for one inbound request. `request_id` is filled in by
/// [`request_id_middleware`].
pub fn make_request_span(request: &Request) -> Span {
    debug_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        version = ?request.version(),
        request_id = field::Empty,
    )
}

/// Request ID extension type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Reuse the inbound `X-Request-ID` or generate one, expose it to handlers
/// through request extensions and echo it on the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Span::current().record("request_id", request_id.as_str());

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    response
}
