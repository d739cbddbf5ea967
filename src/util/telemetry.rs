use std::time::Duration;

use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{self, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::util::env::{Env, Exporter};

pub type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>;

const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Console logging plus whichever OpenTelemetry providers the environment asks for.
///
/// With `OTEL_EXPORTER=otlp` and no collector endpoint, only the console layer is installed.
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub tracer_name: String,
    pub base_resource: Resource,
    log_filter: String,

    logger_provider: Option<SdkLoggerProvider>,
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Telemetry {
    pub fn new(env: &Env) -> Result<Telemetry> {
        let service_version = env!("CARGO_PKG_VERSION");
        let base_resource = base_attrs(&env.api_service_name, service_version);

        let (logger_provider, tracer_provider, meter_provider) =
            match (env.otel_exporter, env.otlp_endpoint()) {
                (Exporter::Stdout, _) => (None, Some(build_stdout_provider(base_resource.clone())), None),
                (Exporter::Otlp, Some(endpoint)) => (
                    Some(build_logger_provider(endpoint, base_resource.clone())?),
                    Some(build_tracer_provider(endpoint, base_resource.clone())?),
                    Some(build_meter_provider(endpoint, base_resource.clone())?),
                ),
                (Exporter::Otlp, None) => (None, None, None),
            };

        Ok(Self {
            tracer_name: env.api_tracer_name.clone(),
            base_resource,
            log_filter: env.log_filter.clone(),
            logger_provider,
            tracer_provider,
            meter_provider,
        })
    }

    /// Installs the global subscriber. `RUST_LOG` takes precedence over the configured filter.
    pub fn register(self) -> Result<Self> {
        let trace_layer = self.tracer_provider.as_ref().map(|provider| {
            global::set_tracer_provider(provider.clone());
            tracing_opentelemetry::layer().with_tracer(global::tracer(self.tracer_name.clone()))
        });
        let log_layer = self
            .logger_provider
            .as_ref()
            .map(OpenTelemetryTracingBridge::new);
        let meter_layer = self
            .meter_provider
            .clone()
            .map(tracing_opentelemetry::MetricsLayer::new);

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.log_filter));

        tracing_subscriber::registry()
            .with(trace_layer)
            .with(log_layer)
            .with(meter_layer)
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init()?;

        tracing::debug!(
            otel_traces = self.tracer_provider.is_some(),
            otel_logs = self.logger_provider.is_some(),
            otel_metrics = self.meter_provider.is_some(),
            resource = ?self.base_resource,
            "telemetry registered"
        );

        Ok(self)
    }

    pub fn shutdown(self) {
        if let Some(meter) = self.meter_provider
            && let Err(e) = meter.shutdown()
        {
            eprintln!("error during metering shutdown: {e:?}");
        }

        if let Some(logger) = self.logger_provider
            && let Err(e) = logger.shutdown()
        {
            eprintln!("error during logging shutdown: {e:?}");
        }

        if let Some(tracer) = self.tracer_provider
            && let Err(e) = tracer.shutdown()
        {
            eprintln!("error during tracing shutdown: {e:?}");
        }
    }
}

pub fn build_logger_provider(endpoint: &str, base_resource: Resource) -> Result<SdkLoggerProvider> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

pub fn build_tracer_provider(endpoint: &str, base_resource: Resource) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

pub fn build_meter_provider(endpoint: &str, base_resource: Resource) -> Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

/// Prints spans to stdout, for local development without a collector
fn build_stdout_provider(base_resource: Resource) -> SdkTracerProvider {
    SdkTracerProvider::builder()
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .with_id_generator(RandomIdGenerator::default())
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(base_resource)
        .build()
}

fn base_attrs(name: &str, version: &'static str) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", name.to_string()),
            KeyValue::new("service.version", version),
        ])
        .build()
}
