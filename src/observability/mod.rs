// src/observability/mod.rs
//! Observability: structured logging and metrics
//!
//! - **Tracing**: `tracing-subscriber` registry with an `EnvFilter`
//!   (`RUST_LOG` wins over the configured level) and a text or JSON layer
//! - **Metrics**: `metrics` facade backed by the Prometheus exporter

pub mod metrics;

use crate::utils::config::LoggingSettings;
use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))?;

    let registry = tracing_subscriber::registry().with(filter);

    if settings.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()?;
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()?;
    }

    Ok(())
}

/// Install the global Prometheus recorder
///
/// The returned handle renders the current metrics in text exposition format.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    self::metrics::describe_all();
    Ok(handle)
}
