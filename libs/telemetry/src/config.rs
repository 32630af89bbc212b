use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtlpProtocol {
    Grpc,
    HttpProtobuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Subscriber and exporter settings for a bot host.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub log_format: LogFormat,
    /// Used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
    pub otlp_endpoint: Option<String>,
    pub otlp_protocol: OtlpProtocol,
    pub otel_enabled: bool,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>, service_version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            environment: "dev".into(),
            log_format: LogFormat::Json,
            default_filter: "info".into(),
            otlp_endpoint: None,
            otlp_protocol: OtlpProtocol::Grpc,
            otel_enabled: false,
        }
    }

    /// Reads `LOG_FORMAT`, `ENABLE_OTEL`, `OTEL_EXPORTER_OTLP_ENDPOINT`,
    /// `OTEL_EXPORTER_OTLP_PROTOCOL`, `OTEL_SERVICE_NAME`,
    /// `OTEL_SERVICE_VERSION` and `OTEL_RESOURCE_ATTRIBUTES`
    /// (`deployment.environment`, falling back to `DEPLOYMENT_ENV`).
    pub fn from_env(default_service_name: &str, default_service_version: &str) -> Self {
        Self::from_lookup(default_service_name, default_service_version, |name| {
            env::var(name).ok()
        })
    }

    fn from_lookup<F>(default_service_name: &str, default_service_version: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(
            lookup("OTEL_SERVICE_NAME").unwrap_or_else(|| default_service_name.to_string()),
            lookup("OTEL_SERVICE_VERSION").unwrap_or_else(|| default_service_version.to_string()),
        );

        if let Some(environment) = lookup("OTEL_RESOURCE_ATTRIBUTES")
            .as_deref()
            .and_then(deployment_environment)
            .or_else(|| lookup("DEPLOYMENT_ENV"))
        {
            config.environment = environment;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "text" | "pretty" | "plain" => LogFormat::Pretty,
                _ => LogFormat::Json,
            };
        }
        config.otlp_endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|e| !e.trim().is_empty());
        config.otlp_protocol = match lookup("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
            Some(p) if p.eq_ignore_ascii_case("http") || p.eq_ignore_ascii_case("http/protobuf") => {
                OtlpProtocol::HttpProtobuf
            }
            _ => OtlpProtocol::Grpc,
        };
        config.otel_enabled = lookup("ENABLE_OTEL").is_some_and(|flag| {
            matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
        });
        config
    }

    /// Exporters need both the switch and somewhere to send to.
    pub fn exporter_enabled(&self) -> bool {
        self.otel_enabled && self.otlp_endpoint.is_some()
    }
}

fn deployment_environment(attributes: &str) -> Option<String> {
    attributes
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == "deployment.environment")
        .map(|(_, value)| value.trim().to_string())
}
