use std::time::Duration;

use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{self, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::util::env::Config;

pub type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>;

/// OTLP providers, only present when a collector endpoint is configured
#[derive(Debug, Clone)]
struct Providers {
    logger: SdkLoggerProvider,
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
}

#[derive(Debug, Clone)]
pub struct Telemetry {
    pub tracer_name: String,
    pub log_filter: String,
    providers: Option<Providers>,
}

impl Telemetry {
    pub fn new(config: &Config) -> Result<Telemetry> {
        let providers = match config.otlp_endpoint() {
            Some(collector_url) => {
                let base_resource =
                    base_attrs(config.api_service_name.clone(), env!("CARGO_PKG_VERSION"));

                Some(Providers {
                    logger: build_logger_provider(collector_url, base_resource.clone())?,
                    tracer: build_tracer_provider(collector_url, base_resource.clone())?,
                    meter: build_meter_provider(collector_url, base_resource)?,
                })
            }
            None => None,
        };

        Ok(Self {
            tracer_name: config.api_tracer_name.clone(),
            log_filter: config.log_filter.clone(),
            providers,
        })
    }

    pub fn register(self) -> Self {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true);

        let registry = tracing_subscriber::registry()
            .with(EnvFilter::new(&self.log_filter))
            .with(fmt_layer);

        match &self.providers {
            Some(providers) => {
                global::set_tracer_provider(providers.tracer.clone());
                let tracer = global::tracer(self.tracer_name.clone());

                registry
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .with(OpenTelemetryTracingBridge::new(&providers.logger))
                    .with(tracing_opentelemetry::MetricsLayer::new(
                        providers.meter.clone(),
                    ))
                    .init();
            }
            None => registry.init(),
        }

        self
    }

    pub fn shutdown(self) {
        let Some(providers) = self.providers else {
            return;
        };

        if let Err(e) = providers.meter.shutdown() {
            eprintln!("error during metering shutdown: {e:?}");
        }

        if let Err(e) = providers.logger.shutdown() {
            eprintln!("error during logging shutdown: {e:?}");
        }

        if let Err(e) = providers.tracer.shutdown() {
            eprintln!("error during tracing shutdown: {e:?}");
        }
    }
}

fn build_logger_provider(collector_url: &str, base_resource: Resource) -> Result<SdkLoggerProvider> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(Endpoint::Logs.to_url(collector_url))
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn build_tracer_provider(collector_url: &str, base_resource: Resource) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(Endpoint::Traces.to_url(collector_url))
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn build_meter_provider(collector_url: &str, base_resource: Resource) -> Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(Endpoint::Metrics.to_url(collector_url))
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn base_attrs(name: String, version: &'static str) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", name),
            KeyValue::new("service.version", version),
        ])
        .build()
}

enum Endpoint {
    Logs,
    Traces,
    Metrics,
}

impl Endpoint {
    pub fn to_url(&self, collector_endpoint: &str) -> String {
        let location: &str = match self {
            Endpoint::Logs => "/v1/logs",
            Endpoint::Traces => "/v1/traces",
            Endpoint::Metrics => "/v1/metrics",
        };

        format!("{}{location}", collector_endpoint.trim_end_matches('/'))
    }
}
