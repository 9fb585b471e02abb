//! OpenTelemetry meter provider setup.

use anyhow::{Context, Result};
use opentelemetry::global;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::runtime;

use tracklog_core::config::MetricsConfig;
use tracklog_core::metrics::TracklogMetrics;

/// Instrumentation scope of every tracklog counter.
pub const METER_NAME: &str = "tracklog";

/// Build the meter provider and install it globally. Without an OTLP
/// endpoint counters are recorded but never exported.
///
/// Must run inside the Tokio runtime when an endpoint is set.
pub fn init_metrics(config: &MetricsConfig) -> Result<SdkMeterProvider> {
    let provider = match &config.otlp_endpoint {
        Some(endpoint) => opentelemetry_otlp::new_pipeline()
            .metrics(runtime::Tokio)
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint.clone()),
            )
            .with_period(config.export_interval())
            .build()
            .with_context(|| format!("building OTLP metrics pipeline for {endpoint}"))?,
        None => SdkMeterProvider::builder().build(),
    };
    global::set_meter_provider(provider.clone());
    Ok(provider)
}

/// The tracklog counters on `provider`.
pub fn tracklog_metrics(provider: &SdkMeterProvider) -> TracklogMetrics {
    TracklogMetrics::new(&provider.meter(METER_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracklog_core::metrics::Metrics;

    #[test]
    fn recording_only_provider_without_endpoint() {
        let provider = init_metrics(&MetricsConfig::default()).unwrap();
        let metrics = tracklog_metrics(&provider);
        metrics.poll_completed("boards", 2);
        metrics.events_written("boards", 2);
        provider.shutdown().unwrap();
    }
}
