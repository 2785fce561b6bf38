use std::{net::SocketAddr, num::NonZero, time::Duration};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{self, PrometheusBuilder};

pub(crate) fn init(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_bucket_duration(Duration::from_secs(60))?
        .set_bucket_count(NonZero::new(5).context("Bucket count must be non-zero")?)
        .install()?;
    tracing::info!("Serving Prometheus metrics on {addr}...");
    Ok(())
}
