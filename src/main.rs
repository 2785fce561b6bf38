mod config;
mod handler;
mod logging;
mod metrics;
mod rate_limiter;

use anyhow::Result;
use clap::{ArgAction, Parser};

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ApiKey, ProxyConfig};
use crate::handler::state::ProxyState;

#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct Args {
    #[arg(long, env = "CONFIG_FILE")]
    config_file: Option<PathBuf>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "LOG_JSON", action = ArgAction::SetTrue, value_parser = only_true)]
    json: bool,

    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Origin of the photo service, e.g. http://photos.lan:2283
    #[arg(long, env = "IMMICH_URL")]
    immich_url: Option<String>,

    #[arg(long, env = "IMMICH_API_KEY", hide_env_values = true)]
    immich_api_key: Option<ApiKey>,

    /// Seconds each photo stays on screen.
    #[arg(long, env = "INTERVAL")]
    interval: Option<String>,

    #[arg(long, env = "TRANSITION")]
    transition: Option<String>,

    #[arg(long, env = "IMAGE_FIT")]
    image_fit: Option<String>,

    /// Comma separated album ids, favorites when empty.
    #[arg(long, env = "ALBUM_ID")]
    album_id: Option<String>,

    #[arg(long, env = "DEBUG", action = ArgAction::SetTrue, value_parser = only_true)]
    debug: bool,
}

/// Switches read from the environment are on only for the literal `true`,
/// anything else (`1`, `yes`, empty) is off rather than a startup error.
fn only_true(value: &str) -> Result<bool, Infallible> {
    Ok(value == "true")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(&args)?;

    let mut config = ProxyConfig::load(args.config_file.as_deref())?;
    config.apply_args(&args);
    config.validate()?;

    if let Some(metrics_port) = config.metrics_port {
        let loopback_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        metrics::init(SocketAddr::new(loopback_address, metrics_port))?;
    }

    let state = ProxyState::new(config.clone())?;
    if config.rate_limit.enabled {
        state
            .rate_limiter
            .spawn_sweeper(Duration::from_secs(config.rate_limit.sweep_interval_secs));
    }

    let proxy_socket_addr = SocketAddr::new(config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(proxy_socket_addr).await?;

    tracing::info!("Starting server on {proxy_socket_addr}...");
    tracing::info!(upstream = %config.upstream.url, "Target photo server");
    match config.slideshow.album_id.is_empty() {
        true => tracing::info!("Album: (showing favorites)"),
        false => tracing::info!(album_id = %config.slideshow.album_id, "Album"),
    }

    let make_service = handler::router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(?error, "Couldn't listen for Ctrl-C.");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(?error, "Couldn't listen for SIGTERM.");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switches_are_on_only_for_literal_true() -> Result<()> {
        std::env::set_var("DEBUG", "1");
        std::env::set_var("LOG_JSON", "yes");
        let args = Args::try_parse_from(["kiosk-proxy"]);
        std::env::remove_var("DEBUG");
        std::env::remove_var("LOG_JSON");

        let args = args?;
        assert!(!args.debug);
        assert!(!args.json);
        Ok(())
    }

    #[test]
    fn switch_flags_turn_on() -> Result<()> {
        let args = Args::try_parse_from(["kiosk-proxy", "--debug", "--json"])?;
        assert!(args.debug);
        assert!(args.json);
        Ok(())
    }

    #[test]
    fn only_true_ignores_other_spellings() {
        assert_eq!(only_true("true"), Ok(true));
        for value in ["1", "yes", "TRUE", "on", ""] {
            assert_eq!(only_true(value), Ok(false));
        }
    }
}
