//! Edge guard for everything under `/api`
//!
//! Runs, in order:
//! 1. Origin allow-list (requests without `Origin` pass)
//! 2. Per-client fixed-window rate limit
//! 3. Streaming body cap
//!
//! Every rejection is terminal for the request.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::config::ServerConfig;
use crate::error::rpc_codes;
use crate::failsafe::{RateDecision, RateLimiter};

/// Resolved edge policy shared by the middleware
pub struct EdgePolicy {
    allowed_origins: Vec<String>,
    limiter: RateLimiter,
    max_body_bytes: usize,
}

impl EdgePolicy {
    /// Build the policy from server configuration
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        let allowed_origins = config
            .allowed_origins
            .iter()
            .filter_map(|o| normalize_origin(o))
            .collect();
        Self {
            allowed_origins,
            limiter: RateLimiter::new(&config.rate_limit),
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// Body cap in bytes
    #[must_use]
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Whether a browser `Origin` may call the API.
    ///
    /// With an allow-list, the origin must be on it. Without one, the origin
    /// must name the request's own `Host` over http or https.
    #[must_use]
    pub fn origin_allowed(&self, origin: &str, host: Option<&str>) -> bool {
        let Some(origin) = normalize_origin(origin) else {
            return false;
        };
        if !self.allowed_origins.is_empty() {
            return self.allowed_origins.contains(&origin);
        }
        let Some(host) = host else {
            return false;
        };
        let host = host.trim().to_ascii_lowercase();
        origin == format!("http://{host}") || origin == format!("https://{host}")
    }

    /// Count a request for `client` against the rate limit
    pub fn check_rate(&self, client: &str) -> RateDecision {
        self.limiter.check(client)
    }

    /// Drop rate windows older than twice the window length
    pub fn sweep_rate_windows(&self) {
        self.limiter.sweep(std::time::Instant::now());
    }

    /// Number of clients with a live rate window
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.limiter.tracked_clients()
    }
}

/// Reduce an origin-like string to `scheme://host[:port]`, lowercase.
/// Non-http(s) and opaque origins (`null`) yield `None`.
fn normalize_origin(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let origin = url.origin();
    origin
        .is_tuple()
        .then(|| origin.ascii_serialization().to_ascii_lowercase())
}

/// Client identity for rate limiting: first `X-Forwarded-For` entry, else
/// the socket address, else `"unknown"`.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(ToString::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Why a capped body read stopped
#[derive(Debug)]
pub enum BodyReadError {
    /// More than the cap arrived (or was declared)
    TooLarge,
    /// The client stream failed
    Stream(axum::Error),
}

/// Read `body` into memory, stopping as soon as `limit` bytes are exceeded
///
/// # Errors
///
/// Returns [`BodyReadError::TooLarge`] without reading further once the cap
/// is crossed.
pub async fn read_body_capped(body: Body, limit: usize) -> Result<Bytes, BodyReadError> {
    let mut stream = body.into_data_stream();
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyReadError::Stream)?;
        if buffer.len() + chunk.len() > limit {
            return Err(BodyReadError::TooLarge);
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buffer))
}

/// Edge middleware: origin, rate and size checks
pub async fn edge_middleware(
    State(policy): State<Arc<EdgePolicy>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let headers = request.headers();

    if let Some(origin) = headers.get(header::ORIGIN) {
        let origin = origin.to_str().unwrap_or_default();
        let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
        if !policy.origin_allowed(origin, host) {
            warn!(origin, path = %path, "Origin rejected");
            return edge_rejection(StatusCode::FORBIDDEN, "Origin not allowed");
        }
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(headers, peer);
    if let RateDecision::Limited { retry_after } = policy.check_rate(&ip) {
        warn!(ip = %ip, path = %path, "Rate limit exceeded");
        return rate_limited_response(retry_after);
    }

    let limit = policy.max_body_bytes();
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        warn!(ip = %ip, path = %path, declared = ?declared, limit, "Declared body too large");
        return too_large_response(limit);
    }

    let (parts, body) = request.into_parts();
    let bytes = match read_body_capped(body, limit).await {
        Ok(bytes) => bytes,
        Err(BodyReadError::TooLarge) => {
            warn!(ip = %ip, path = %path, limit, "Body exceeded cap while streaming");
            return too_large_response(limit);
        }
        Err(BodyReadError::Stream(e)) => {
            debug!(ip = %ip, error = %e, "Client body stream failed");
            return edge_rejection(StatusCode::BAD_REQUEST, "Failed to read request body");
        }
    };

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// JSON error body for an edge rejection
pub fn edge_rejection(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": rpc_codes::SERVER_ERROR,
                "message": message
            },
            "id": null
        })),
    )
        .into_response()
}

fn too_large_response(limit: usize) -> Response {
    edge_rejection(
        StatusCode::PAYLOAD_TOO_LARGE,
        &format!("Request body exceeds {limit} bytes"),
    )
}

fn rate_limited_response(retry_after: Duration) -> Response {
    let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    let mut response = edge_rejection(
        StatusCode::TOO_MANY_REQUESTS,
        "Rate limit exceeded. Try again later.",
    );
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, seconds.max(1).into());
    response
}
