//! HTTP dispatch: administrative endpoints, the GET gate and the
//! mapping from engine errors to status codes.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header::HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use tracing::error;

use doormanlb_common::config::ADMIN_PATH_PREFIX;
use doormanlb_common::{DoormanError, UpstreamResponse};

use crate::fetcher::InboundRequest;
use crate::service::CachingService;

const READY_TIMEOUT: Duration = Duration::from_secs(2);

/// Handles health check GET requests.
///
/// # Returns
/// A `200 ok` response while the process is running
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Handles readiness GET requests.
///
/// Readiness holds iff no endpoint caches, or the coordination store
/// answers a ping within the 2 second budget.
///
/// # Arguments
/// * `State(service)` - Shared caching service
///
/// # Returns
/// `200 ready` when ready, otherwise `503` with a short diagnostic
pub async fn ready(State(service): State<Arc<CachingService>>) -> Response {
    match tokio::time::timeout(READY_TIMEOUT, service.ready()).await {
        Ok(Ok(())) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(e)) => {
            (StatusCode::SERVICE_UNAVAILABLE, format!("not ready: {e}")).into_response()
        }
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready: coordination store ping timed out",
        )
            .into_response(),
    }
}

/// Handles metrics GET requests.
///
/// # Arguments
/// * `State(service)` - Shared caching service
///
/// # Returns
/// A `200` JSON object mapping counter names to their current totals
pub async fn metrics(State(service): State<Arc<CachingService>>) -> Response {
    Json(service.metrics()).into_response()
}

/// Fallback handler for every non-administrative path.
///
/// This handler:
/// 1. Rejects unknown paths under the reserved admin prefix
/// 2. Rejects methods other than GET
/// 3. Hands the request to the coordination engine
/// 4. Maps engine errors onto status codes
///
/// # Arguments
/// * `State(service)` - Shared caching service
/// * `request` - The inbound request
///
/// # Returns
/// The buffered upstream response (cached or fresh), `400` for bad
/// requests, `405` for non-GET methods, or `502` for upstream and
/// coordination failures
pub async fn proxy(State(service): State<Arc<CachingService>>, request: Request) -> Response {
    let (parts, _body) = request.into_parts();

    // Anything under the reserved prefix that is not one of the three
    // admin endpoints is never proxied.
    if parts.uri.path().starts_with(ADMIN_PATH_PREFIX) {
        return (StatusCode::BAD_REQUEST, "bad request: reserved path").into_response();
    }

    if parts.method != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
    }

    let inbound = InboundRequest::from_parts(&parts);
    match service.handle(&inbound).await {
        Ok(upstream_response) => into_http_response(upstream_response),
        Err(e) => {
            error!(path = %inbound.path, error = %e, "request failed");
            let status = match e {
                DoormanError::BadRequest(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::BAD_GATEWAY,
            };
            (status, format!("upstream routing failed: {e}")).into_response()
        }
    }
}

/// Converts a buffered upstream response into an HTTP response.
///
/// # Arguments
/// * `upstream` - The buffered response to emit
///
/// # Returns
/// An HTTP response carrying the status, headers and body
///
/// # Behavior
/// Header entries that are not valid HTTP header names or values are
/// skipped rather than failing the whole response.
fn into_http_response(upstream: UpstreamResponse) -> Response {
    let status =
        StatusCode::from_u16(upstream.status_code).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut builder = Response::builder().status(status);
    for (name, values) in &upstream.header {
        for value in values {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                builder = builder.header(name, value);
            }
        }
    }

    builder
        .body(Body::from(upstream.body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}
