pub(crate) const HTTP_REQUEST_DURATION_SECS: &str =
    "http_request_duration_seconds";
pub(crate) const HTTP_REQUEST_SIZE_BYTES: &str = "http_request_size_bytes";
pub(crate) const HTTP_RESPONSE_SIZE_BYTES: &str = "http_response_size_bytes";
pub(crate) const HTTP_RESPONSE_SUCCESS: &str = "http_response_success";
pub(crate) const HTTP_RESPONSE_FAILURE: &str = "http_response_failure";
pub(crate) const PROXY_HTTP_SERVER_ERROR: &str = "proxy_http_server_error";
pub(crate) const PROXY_REJECTIONS: &str = "proxy_rejections";
pub(crate) const RATE_LIMITED_REQUESTS: &str = "rate_limited_requests";
pub(crate) const UPSTREAM_REQUEST_DURATION_SECS: &str =
    "upstream_request_duration_seconds";
pub(crate) const UPSTREAM_ERROR_RESPONSES: &str = "upstream_error_responses";
pub(crate) const UPSTREAM_STREAMED_BYTES: &str = "upstream_streamed_bytes";
pub(crate) const UPSTREAM_STREAM_FAILURE: &str = "upstream_stream_failure";
