use bot_builder::telemetry::{BotTelemetryClient, Severity, TelemetryMetrics, TelemetryProperties};
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

/// Target of every event the client emits, so hosts can route bot
/// telemetry separately from regular logs.
pub const TELEMETRY_TARGET: &str = "bot_telemetry";

/// [`BotTelemetryClient`] that writes events as `tracing` records and
/// counts them with `metrics`. With an OTLP exporter installed the records
/// flow out as span events; otherwise they land in the log stream.
#[derive(Debug, Clone, Default)]
pub struct TracingTelemetryClient;

impl TracingTelemetryClient {
    pub fn new() -> Self {
        Self
    }
}

fn render(properties: &TelemetryProperties) -> String {
    serde_json::to_string(properties).unwrap_or_default()
}

impl BotTelemetryClient for TracingTelemetryClient {
    fn track_event(&self, name: &str, properties: &TelemetryProperties, metrics: &TelemetryMetrics) {
        counter!("bot_telemetry_events_total", "event" => name.to_string()).increment(1);
        for (metric, value) in metrics {
            histogram!("bot_telemetry_event_metric", "event" => name.to_string(), "metric" => metric.clone())
                .record(*value);
        }
        info!(
            target: TELEMETRY_TARGET,
            event = name,
            properties = %render(properties),
            metrics = %serde_json::to_string(metrics).unwrap_or_default(),
            "telemetry event"
        );
    }

    fn track_exception(&self, err: &anyhow::Error, properties: &TelemetryProperties) {
        counter!("bot_telemetry_exceptions_total").increment(1);
        error!(
            target: TELEMETRY_TARGET,
            error = %format!("{err:#}"),
            properties = %render(properties),
            "telemetry exception"
        );
    }

    fn track_trace(&self, message: &str, severity: Severity, properties: &TelemetryProperties) {
        let properties = render(properties);
        match severity {
            Severity::Verbose => debug!(target: TELEMETRY_TARGET, %properties, "{message}"),
            Severity::Information => info!(target: TELEMETRY_TARGET, %properties, "{message}"),
            Severity::Warning => warn!(target: TELEMETRY_TARGET, %properties, "{message}"),
            Severity::Error | Severity::Critical => {
                error!(target: TELEMETRY_TARGET, %properties, ?severity, "{message}")
            }
        }
    }

    fn track_page_view(&self, name: &str, properties: &TelemetryProperties) {
        counter!("bot_telemetry_page_views_total", "page" => name.to_string()).increment(1);
        info!(
            target: TELEMETRY_TARGET,
            page = name,
            properties = %render(properties),
            "telemetry page view"
        );
    }
}
