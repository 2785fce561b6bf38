use axum::{
    http::{self, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Reasons a request is answered by the proxy itself instead of the upstream.
///
/// `Display` is what operators see in logs. Client bodies come from
/// [`ProxyError::details`] and never carry the wrapped error.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ProxyError {
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("path rejected as traversal")]
    BadRequest,
    #[error("path not in allow-list")]
    Forbidden,
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },
    #[error("upstream unavailable: {0:#}")]
    BadGateway(anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    details: &'static str,
}

impl ProxyError {
    pub(crate) fn status(&self) -> StatusCode {
        match self {
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::BadRequest => StatusCode::BAD_REQUEST,
            ProxyError::Forbidden => StatusCode::FORBIDDEN,
            ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ProxyError::MethodNotAllowed => "Method Not Allowed",
            ProxyError::BadRequest => "Bad Request",
            ProxyError::Forbidden => "Forbidden",
            ProxyError::RateLimited { .. } => "Too Many Requests",
            ProxyError::BadGateway(_) => "Bad Gateway",
        }
    }

    fn details(&self) -> &'static str {
        match self {
            ProxyError::MethodNotAllowed => "Only GET and HEAD requests are allowed.",
            ProxyError::BadRequest => "Invalid path.",
            ProxyError::Forbidden => "Endpoint not allowed by proxy whitelist.",
            ProxyError::RateLimited { .. } => "Too many requests, please try again later.",
            ProxyError::BadGateway(_) => "The photo service could not be reached.",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        metrics::counter!(crate::metrics::consts::PROXY_REJECTIONS, "kind" => self.kind())
            .increment(1);

        let body = ErrorBody {
            error: self.kind(),
            details: self.details(),
        };
        let mut response = (self.status(), Json(body)).into_response();

        match self {
            ProxyError::MethodNotAllowed => {
                response
                    .headers_mut()
                    .insert(http::header::ALLOW, HeaderValue::from_static("GET, HEAD"));
            }
            ProxyError::RateLimited { retry_after_secs } => {
                response
                    .headers_mut()
                    .insert(http::header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            }
            _ => {}
        }
        response
    }
}
