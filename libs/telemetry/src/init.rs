use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::{ExporterBuildError, HasExportConfig, MetricExporter, SpanExporter};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::info;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{LogFormat, OtlpProtocol, TelemetryConfig};

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();
static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// Installs the global subscriber: an `fmt` layer filtered by `RUST_LOG`,
/// plus OTLP span and metric export when the config enables it. Later
/// calls leave the installed subscriber in place.
pub fn init_telemetry(cfg: &TelemetryConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.default_filter.as_str()));
    let fmt_layer = match cfg.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
    };

    let otel_layer = if cfg.exporter_enabled() {
        let tracer_provider = SdkTracerProvider::builder()
            .with_resource(resource(cfg))
            .with_batch_exporter(span_exporter(cfg)?)
            .build();
        let tracer = tracer_provider.tracer(cfg.service_name.clone());
        global::set_tracer_provider(tracer_provider.clone());
        global::set_text_map_propagator(TraceContextPropagator::new());
        TRACER_PROVIDER.set(tracer_provider).ok();
        init_metrics(cfg)?;
        Some(OpenTelemetryLayer::<Registry, _>::new(tracer))
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(otel_layer)
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok();
    if installed {
        info!(
            service = %cfg.service_name,
            environment = %cfg.environment,
            otel = cfg.exporter_enabled(),
            "telemetry initialised"
        );
    }
    Ok(())
}

/// Flushes and stops the OTLP pipelines, if any were started.
pub fn shutdown_telemetry() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        provider.shutdown().ok();
    }
    if let Some(provider) = METER_PROVIDER.get() {
        provider.shutdown().ok();
    }
}

fn init_metrics(cfg: &TelemetryConfig) -> Result<()> {
    if METER_PROVIDER.get().is_some() {
        return Ok(());
    }
    let reader = PeriodicReader::builder(metric_exporter(cfg)?)
        .with_interval(Duration::from_secs(15))
        .build();
    let provider = SdkMeterProvider::builder()
        .with_resource(resource(cfg))
        .with_reader(reader)
        .build();
    global::set_meter_provider(provider.clone());
    METER_PROVIDER.set(provider).ok();
    Ok(())
}

fn span_exporter(cfg: &TelemetryConfig) -> Result<SpanExporter, ExporterBuildError> {
    let endpoint = cfg.otlp_endpoint.clone();
    match cfg.otlp_protocol {
        OtlpProtocol::Grpc => {
            let mut builder = SpanExporter::builder().with_tonic();
            builder.export_config().endpoint = endpoint;
            builder.build()
        }
        OtlpProtocol::HttpProtobuf => {
            let mut builder = SpanExporter::builder().with_http();
            builder.export_config().endpoint = endpoint;
            builder.build()
        }
    }
}

fn metric_exporter(cfg: &TelemetryConfig) -> Result<MetricExporter, ExporterBuildError> {
    let endpoint = cfg.otlp_endpoint.clone();
    match cfg.otlp_protocol {
        OtlpProtocol::Grpc => {
            let mut builder = MetricExporter::builder().with_tonic();
            builder.export_config().endpoint = endpoint;
            builder.build()
        }
        OtlpProtocol::HttpProtobuf => {
            let mut builder = MetricExporter::builder().with_http();
            builder.export_config().endpoint = endpoint;
            builder.build()
        }
    }
}

fn resource(cfg: &TelemetryConfig) -> Resource {
    Resource::builder_empty()
        .with_service_name(cfg.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", cfg.service_version.clone()),
            KeyValue::new("deployment.environment", cfg.environment.clone()),
        ])
        .build()
}
