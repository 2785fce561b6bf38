pub(crate) const API_KEY_HEADER_KEY: &str = "x-api-key";
pub(crate) const ACCEPT: &str = "application/json";

// The photo service serves its API under this segment of the origin.
pub(crate) const API_PATH_SUFFIX: &str = "/api";

pub(crate) const PROXY_MOUNT: &str = "/api/proxy";

pub(crate) const CONFIG_INJECTION_MARKER: &str = "<!-- CONFIG_INJECTION -->";

// Connection-scoped headers that must not be relayed (RFC 9110 section 7.6.1).
pub(crate) const HOP_BY_HOP_HEADER_KEYS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];
