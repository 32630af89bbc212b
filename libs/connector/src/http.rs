use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::conversations::map_response;
use crate::error::ConnectorError;

/// A JSON POST to a cognitive service endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub timeout: Option<Duration>,
}

impl JsonRequest {
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body,
            timeout: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Seam between the QnA and LUIS clients and the network, so tests can
/// answer requests from memory.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends `request` and returns the decoded JSON body of a 2xx response.
    async fn post_json(&self, request: JsonRequest) -> Result<Value, ConnectorError>;
}

/// [`HttpTransport`] over a shared `reqwest` client. `service` labels the
/// metrics it records.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    service: &'static str,
}

impl ReqwestTransport {
    pub fn new(client: Client, service: &'static str) -> Self {
        Self { client, service }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(&self, request: JsonRequest) -> Result<Value, ConnectorError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|err| {
            counter!(
                "bot_cognitive_errors_total",
                "kind" => "transport",
                "service" => self.service
            )
            .increment(1);
            ConnectorError::Transport(err)
        })?;

        histogram!(
            "bot_cognitive_roundtrip_seconds",
            "service" => self.service,
            "status" => response.status().as_str().to_string()
        )
        .record(started.elapsed().as_secs_f64());
        debug!(service = self.service, status = response.status().as_u16(), "cognitive service call");

        map_response(self.service, response).await
    }
}
