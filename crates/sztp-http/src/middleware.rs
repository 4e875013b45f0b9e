//! Shared middleware stack
//!
//! Applied to both planes: request tracing, a request timeout and an access
//! log tagged with the plane and the peer.

use axum::{
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    Router,
};
use std::time::{Duration, Instant};
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};

use crate::ConnectionInfo;

/// Middleware configuration
#[derive(Debug, Clone)]
pub struct MiddlewareConfig {
    /// Enable request tracing (default: true)
    pub tracing_enabled: bool,
    /// Request timeout (default: 30s)
    pub timeout: Duration,
    /// Enable request logging (default: true)
    pub request_logging: bool,
    /// Plane name recorded on access-log events, e.g. "management"
    pub label: &'static str,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            tracing_enabled: true,
            timeout: Duration::from_secs(30),
            request_logging: true,
            label: "http",
        }
    }
}

impl MiddlewareConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracing(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    pub fn request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }

    pub fn label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }
}

/// Apply the middleware stack to a router
pub fn apply_middleware(router: Router, config: MiddlewareConfig) -> Router {
    let mut router = router;

    if config.request_logging {
        let label = config.label;
        router = router.layer(middleware::from_fn(move |request: Request<Body>, next: Next| {
            access_log(label, request, next)
        }));
    }

    router = router.layer(TimeoutLayer::new(config.timeout));

    if config.tracing_enabled {
        router = router.layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        );
    }

    router
}

/// One access-log line per exchange; the level follows the status class
async fn access_log(label: &'static str, request: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let (peer, tls) = request
        .extensions()
        .get::<ConnectionInfo>()
        .map(|info| (info.remote_addr.to_string(), info.tls))
        .unwrap_or_else(|| ("-".to_string(), false));

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let latency_ms = started.elapsed().as_millis() as u64;
    match response.status() {
        s if s.is_server_error() => error!(plane = label, %peer, tls, %method, %path, status, latency_ms, "request failed"),
        s if s.is_client_error() => warn!(plane = label, %peer, tls, %method, %path, status, latency_ms, "request rejected"),
        _ => info!(plane = label, %peer, tls, %method, %path, status, latency_ms, "request served"),
    }
    response
}
