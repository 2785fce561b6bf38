use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Error, Result};
use serde::Deserialize;

use crate::Args;

const fn _default_port() -> u16 { 3000 }
const fn _default_bind_address() -> IpAddr { IpAddr::V4(Ipv4Addr::UNSPECIFIED) }

const fn _default_connect_timeout_secs() -> u64 { 10 }
const fn _default_read_timeout_secs() -> u64 { 60 }

const fn _default_rate_limit_enabled() -> bool { true }
const fn _default_window_secs() -> u64 { 15 * 60 }
const fn _default_max_requests() -> u32 { 500 }
const fn _default_sweep_interval_secs() -> u64 { 60 }

const fn _default_interval() -> u64 { 15 }

fn _default_allowed_prefixes() -> Vec<String> {
    ["albums", "asset", "assets"].map(String::from).to_vec()
}
fn _default_transition() -> String { "fade".to_string() }
fn _default_image_fit() -> String { "cover".to_string() }

#[derive(Deserialize, Clone, Debug)]
pub(crate) struct ProxyConfig {
    #[serde(default = "_default_bind_address")]
    pub(crate) bind_address: IpAddr,
    #[serde(default = "_default_port")]
    pub(crate) port: u16,
    #[serde(default)]
    pub(crate) metrics_port: Option<u16>,
    /// HTML template for the viewer page. The bundled one is used when unset.
    #[serde(default)]
    pub(crate) viewer_template: Option<PathBuf>,
    #[serde(default)]
    pub(crate) debug: bool,
    #[serde(default)]
    pub(crate) upstream: UpstreamConfig,
    #[serde(default)]
    pub(crate) rate_limit: RateLimitConfig,
    #[serde(default)]
    pub(crate) slideshow: SlideshowSettings,
}

#[derive(Deserialize, Clone, Debug)]
pub(crate) struct UpstreamConfig {
    /// Origin of the photo service, with or without the trailing `/api`.
    #[serde(default)]
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) api_key: ApiKey,
    /// First path segments the proxy will relay.
    #[serde(default = "_default_allowed_prefixes")]
    pub(crate) allowed_prefixes: Vec<String>,
    #[serde(default = "_default_connect_timeout_secs")]
    pub(crate) connect_timeout_secs: u64,
    /// Idle time allowed between two reads of an upstream response.
    #[serde(default = "_default_read_timeout_secs")]
    pub(crate) read_timeout_secs: u64,
    #[serde(default)]
    pub(crate) https_only: bool,
}

#[derive(Deserialize, Clone, Debug)]
pub(crate) struct RateLimitConfig {
    #[serde(default = "_default_rate_limit_enabled")]
    pub(crate) enabled: bool,
    #[serde(default = "_default_window_secs")]
    pub(crate) window_secs: u64,
    #[serde(default = "_default_max_requests")]
    pub(crate) max_requests: u32,
    #[serde(default = "_default_sweep_interval_secs")]
    pub(crate) sweep_interval_secs: u64,
}

/// Settings handed to the viewer page.
#[derive(Deserialize, Clone, Debug)]
pub(crate) struct SlideshowSettings {
    #[serde(default = "_default_interval")]
    pub(crate) interval: u64,
    #[serde(default = "_default_transition")]
    pub(crate) transition: String,
    #[serde(default = "_default_image_fit")]
    pub(crate) image_fit: String,
    /// Comma separated album ids. Empty shows favorites.
    #[serde(default)]
    pub(crate) album_id: String,
}

/// Upstream API credential. Never printed.
#[derive(Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub(crate) struct ApiKey(String);

impl ApiKey {
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for ApiKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.is_empty() {
            true => f.write_str("ApiKey(<unset>)"),
            false => f.write_str("ApiKey(<redacted>)"),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_address: _default_bind_address(),
            port: _default_port(),
            metrics_port: None,
            viewer_template: None,
            debug: false,
            upstream: UpstreamConfig::default(),
            rate_limit: RateLimitConfig::default(),
            slideshow: SlideshowSettings::default(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: ApiKey::default(),
            allowed_prefixes: _default_allowed_prefixes(),
            connect_timeout_secs: _default_connect_timeout_secs(),
            read_timeout_secs: _default_read_timeout_secs(),
            https_only: false,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: _default_rate_limit_enabled(),
            window_secs: _default_window_secs(),
            max_requests: _default_max_requests(),
            sweep_interval_secs: _default_sweep_interval_secs(),
        }
    }
}

impl Default for SlideshowSettings {
    fn default() -> Self {
        Self {
            interval: _default_interval(),
            transition: _default_transition(),
            image_fit: _default_image_fit(),
            album_id: String::new(),
        }
    }
}

impl ProxyConfig {
    /// Reads the TOML file when one is given, defaults otherwise.
    pub(crate) fn load(config_file: Option<&Path>) -> Result<Self> {
        match config_file {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Couldn't read config file {}", path.display()))?;
                Ok(toml::from_str(&contents)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Command line flags and their environment variables win over the file.
    pub(crate) fn apply_args(&mut self, args: &Args) {
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(url) = &args.immich_url {
            self.upstream.url = url.clone();
        }
        if let Some(api_key) = &args.immich_api_key {
            self.upstream.api_key = api_key.clone();
        }
        if let Some(interval) = &args.interval {
            self.slideshow.interval = match interval.trim().parse::<u64>() {
                Ok(seconds) if seconds > 0 => seconds,
                _ => {
                    tracing::warn!(
                        %interval,
                        "Slideshow interval is not a positive number of seconds, using {}.",
                        _default_interval()
                    );
                    _default_interval()
                }
            };
        }
        if let Some(transition) = &args.transition {
            self.slideshow.transition = transition.clone();
        }
        if let Some(image_fit) = &args.image_fit {
            self.slideshow.image_fit = image_fit.clone();
        }
        if let Some(album_id) = &args.album_id {
            self.slideshow.album_id = album_id.clone();
        }
        if args.debug {
            self.debug = true;
        }
        if self.slideshow.interval == 0 {
            tracing::warn!(
                "Slideshow interval must be positive, using {}.",
                _default_interval()
            );
            self.slideshow.interval = _default_interval();
        }
    }

    /// Fails on values the proxy cannot run with and warns on the ones that
    /// only make every upstream request fail.
    pub(crate) fn validate(&self) -> Result<()> {
        let upstream = &self.upstream;
        if upstream.url.trim().is_empty() || upstream.api_key.is_empty() {
            tracing::warn!(
                "IMMICH_URL and IMMICH_API_KEY are not both set. Proxy requests will fail with 502 until they are."
            );
        }
        if !upstream.url.trim().is_empty() {
            let url = reqwest::Url::parse(upstream.url.trim())
                .context("Upstream URL is not a valid URL")?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::msg(format!(
                    "Upstream URL scheme \"{}\" is not http or https.",
                    url.scheme()
                )));
            }
        }
        if upstream.allowed_prefixes.is_empty() {
            return Err(Error::msg("Allowed prefixes must not be empty."));
        }
        if let Some(prefix) = upstream
            .allowed_prefixes
            .iter()
            .find(|prefix| prefix.is_empty() || prefix.contains(['/', '\\', '%']) || prefix.contains(".."))
        {
            return Err(Error::msg(format!(
                "Allowed prefix \"{prefix}\" must be a single plain path segment."
            )));
        }

        let rate_limit = &self.rate_limit;
        if rate_limit.enabled {
            anyhow::ensure!(rate_limit.window_secs > 0, "Rate limit window must be positive.");
            anyhow::ensure!(rate_limit.max_requests > 0, "Rate limit maximum must be positive.");
            anyhow::ensure!(
                rate_limit.sweep_interval_secs > 0,
                "Rate limit sweep interval must be positive."
            );
        } else {
            tracing::warn!("Rate limiting is disabled, every request will be admitted.");
        }
        Ok(())
    }
}
