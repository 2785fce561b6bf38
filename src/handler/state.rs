use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderValue;

use super::target;
use crate::config::ProxyConfig;
use crate::rate_limiter::RateLimiter;

#[derive(Clone)]
pub(crate) struct ProxyState {
    pub(crate) config: Arc<ProxyConfig>,
    pub(crate) http_client: reqwest::Client,
    /// Origin with the API segment, `None` until an upstream is configured.
    pub(crate) api_base: Option<Arc<str>>,
    /// Marked sensitive so header dumps print it redacted.
    pub(crate) api_key_header: Option<HeaderValue>,
    pub(crate) rate_limiter: Arc<RateLimiter>,
}

impl ProxyState {
    pub(crate) fn new(config: ProxyConfig) -> Result<Self> {
        let api_base = target::api_base(&config.upstream.url).map(Arc::from);

        let api_key_header = match config.upstream.api_key.is_empty() {
            true => None,
            false => {
                let mut header = HeaderValue::from_str(config.upstream.api_key.expose())
                    .context("Upstream API key contains characters not allowed in a header")?;
                header.set_sensitive(true);
                Some(header)
            }
        };

        Ok(Self {
            http_client: http_client(&config)?,
            api_base,
            api_key_header,
            rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            config: Arc::new(config),
        })
    }
}

fn http_client(config: &ProxyConfig) -> Result<reqwest::Client> {
    let http_client = reqwest::Client::builder()
        .https_only(config.upstream.https_only)
        .connect_timeout(Duration::from_secs(config.upstream.connect_timeout_secs))
        .read_timeout(Duration::from_secs(config.upstream.read_timeout_secs))
        // A redirect to another host would carry the API key with it.
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()?;
    Ok(http_client)
}
