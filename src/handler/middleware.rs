use crate::metrics::consts::*;
use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{self, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, histogram};

use super::errors::ProxyError;
use super::state::ProxyState;
use crate::rate_limiter::Admission;

// Bodies are streamed, so sizes are taken from Content-Length when present
// instead of collecting the body.
pub(crate) async fn metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();

    if let Some(request_size) = content_length(request.headers()) {
        histogram!(HTTP_REQUEST_SIZE_BYTES).record(request_size);
    }

    let response = next.run(request).await;

    if let Some(response_size) = content_length(response.headers()) {
        histogram!(HTTP_RESPONSE_SIZE_BYTES).record(response_size);
    }

    // This could be the photo service or the proxy itself.
    if response.status().is_server_error() {
        counter!(PROXY_HTTP_SERVER_ERROR).increment(1)
    }

    if response.status().is_success() {
        counter!(HTTP_RESPONSE_SUCCESS).increment(1)
    } else {
        counter!(HTTP_RESPONSE_FAILURE).increment(1)
    }

    histogram!(HTTP_REQUEST_DURATION_SECS).record(start.elapsed().as_secs_f64());

    response
}

fn content_length(headers: &http::HeaderMap) -> Option<f64> {
    headers
        .get(http::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(|length| length as f64)
}

pub(crate) async fn rate_limit(
    State(state): State<ProxyState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let limiter = &state.rate_limiter;
    let policy = format!(
        "{};w={}",
        limiter.max_requests(),
        limiter.window().as_secs()
    );

    let (mut response, remaining, reset) = match limiter.admit(client.ip()) {
        Admission::Unlimited => return next.run(request).await,
        Admission::Rejected { reset } => {
            counter!(RATE_LIMITED_REQUESTS).increment(1);
            tracing::warn!(client = %client.ip(), "Rate limit exceeded");
            let retry_after_secs = reset.as_secs().max(1);
            (
                ProxyError::RateLimited { retry_after_secs }.into_response(),
                0,
                reset,
            )
        }
        Admission::Allowed { remaining, reset } => (next.run(request).await, remaining, reset),
    };

    let rate_limit = format!(
        "limit={}, remaining={remaining}, reset={}",
        limiter.max_requests(),
        reset.as_secs()
    );
    let headers = response.headers_mut();
    for (name, value) in [("ratelimit-policy", policy), ("ratelimit", rate_limit)] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    response
}

// No Content-Security-Policy and no HSTS: kiosk browsers are old and the
// proxy is usually reached over plain HTTP on a LAN.
const SECURITY_HEADERS: [(&str, &str); 8] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "SAMEORIGIN"),
    ("referrer-policy", "no-referrer"),
    ("cross-origin-resource-policy", "same-origin"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-permitted-cross-domain-policies", "none"),
    ("origin-agent-cluster", "?1"),
];

pub(crate) async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    headers.remove(http::header::SERVER);
    headers.remove("x-powered-by");
    response
}
