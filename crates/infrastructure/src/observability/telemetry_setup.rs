//! Prometheus exporter setup

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing::info;

/// Install the global Prometheus recorder and serve `/metrics` on `listen`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(listen: SocketAddr) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(listen = %listen, "Prometheus exporter listening");
    Ok(())
}
