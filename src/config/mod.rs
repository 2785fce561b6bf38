#[allow(clippy::module_inception)]
mod config;

pub(crate) use config::{ApiKey, ProxyConfig, RateLimitConfig};
