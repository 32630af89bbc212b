use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bot_schema::{
    Activity, ChannelAccount, ConversationParameters, ConversationResourceResponse,
    ResourceResponse,
};
use metrics::{counter, histogram};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::credentials::AppCredentials;
use crate::error::ConnectorError;

/// Operations on the channel service's `v3/conversations` resource.
#[async_trait]
pub trait ConnectorApi: Send + Sync {
    async fn send_to_conversation(
        &self,
        conversation_id: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, ConnectorError>;

    async fn reply_to_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, ConnectorError>;

    async fn update_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, ConnectorError>;

    async fn delete_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
    ) -> Result<(), ConnectorError>;

    async fn get_conversation_members(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ChannelAccount>, ConnectorError>;

    async fn get_activity_members(
        &self,
        conversation_id: &str,
        activity_id: &str,
    ) -> Result<Vec<ChannelAccount>, ConnectorError>;

    async fn delete_conversation_member(
        &self,
        conversation_id: &str,
        member_id: &str,
    ) -> Result<(), ConnectorError>;

    async fn create_conversation(
        &self,
        parameters: &ConversationParameters,
    ) -> Result<ConversationResourceResponse, ConnectorError>;
}

pub struct RestConnectorClient {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn AppCredentials>,
}

impl RestConnectorClient {
    pub fn new(
        client: Client,
        service_url: &str,
        credentials: Arc<dyn AppCredentials>,
    ) -> Result<Self, ConnectorError> {
        let normalized = if service_url.ends_with('/') {
            service_url.to_string()
        } else {
            format!("{service_url}/")
        };
        let url = Url::parse(&normalized).map_err(|err| ConnectorError::Config(err.into()))?;
        Ok(Self {
            client,
            base_url: url,
            credentials,
        })
    }

    pub fn service_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ConnectorError> {
        let path = segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        self.base_url
            .join(&format!("v3/conversations{}{path}", if path.is_empty() { "" } else { "/" }))
            .map_err(|err| ConnectorError::Config(err.into()))
    }

    async fn authorize(&self, builder: RequestBuilder) -> Result<RequestBuilder, ConnectorError> {
        Ok(match self.credentials.get_token().await? {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        builder: RequestBuilder,
    ) -> Result<T, ConnectorError> {
        let started = Instant::now();
        let response = self.authorize(builder).await?.send().await.map_err(|err| {
            counter!(
                "bot_connector_errors_total",
                "kind" => "transport",
                "endpoint" => endpoint
            )
            .increment(1);
            ConnectorError::Transport(err)
        })?;

        let status_label = response.status().as_str().to_string();
        histogram!(
            "bot_connector_roundtrip_seconds",
            "endpoint" => endpoint,
            "status" => status_label
        )
        .record(started.elapsed().as_secs_f64());
        debug!(endpoint, status = response.status().as_u16(), "connector call");

        map_response(endpoint, response).await
    }
}

#[async_trait]
impl ConnectorApi for RestConnectorClient {
    async fn send_to_conversation(
        &self,
        conversation_id: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, ConnectorError> {
        let url = self.endpoint(&[conversation_id, "activities"])?;
        self.execute("conversations.send", self.client.post(url).json(activity))
            .await
    }

    async fn reply_to_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, ConnectorError> {
        let url = self.endpoint(&[conversation_id, "activities", activity_id])?;
        self.execute("conversations.reply", self.client.post(url).json(activity))
            .await
    }

    async fn update_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, ConnectorError> {
        let url = self.endpoint(&[conversation_id, "activities", activity_id])?;
        self.execute("conversations.update", self.client.put(url).json(activity))
            .await
    }

    async fn delete_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
    ) -> Result<(), ConnectorError> {
        let url = self.endpoint(&[conversation_id, "activities", activity_id])?;
        self.execute::<serde_json::Value>("conversations.delete", self.client.delete(url))
            .await
            .map(|_| ())
    }

    async fn get_conversation_members(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ChannelAccount>, ConnectorError> {
        let url = self.endpoint(&[conversation_id, "members"])?;
        self.execute("conversations.members", self.client.get(url))
            .await
    }

    async fn get_activity_members(
        &self,
        conversation_id: &str,
        activity_id: &str,
    ) -> Result<Vec<ChannelAccount>, ConnectorError> {
        let url = self.endpoint(&[conversation_id, "activities", activity_id, "members"])?;
        self.execute("conversations.activity_members", self.client.get(url))
            .await
    }

    async fn delete_conversation_member(
        &self,
        conversation_id: &str,
        member_id: &str,
    ) -> Result<(), ConnectorError> {
        let url = self.endpoint(&[conversation_id, "members", member_id])?;
        self.execute::<serde_json::Value>("conversations.delete_member", self.client.delete(url))
            .await
            .map(|_| ())
    }

    async fn create_conversation(
        &self,
        parameters: &ConversationParameters,
    ) -> Result<ConversationResourceResponse, ConnectorError> {
        let url = self.endpoint(&[])?;
        self.execute("conversations.create", self.client.post(url).json(parameters))
            .await
    }
}

pub(crate) async fn map_response<T: DeserializeOwned>(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<T, ConnectorError> {
    let status = response.status();
    if !status.is_success() {
        let status_label = status.as_str().to_string();
        let retry_after = retry_after(&response);
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable>".into());
        counter!(
            "bot_connector_errors_total",
            "kind" => "remote",
            "endpoint" => endpoint,
            "status" => status_label
        )
        .increment(1);
        return Err(ConnectorError::Remote {
            status,
            retry_after,
            message: body.chars().take(512).collect(),
        });
    }

    let bytes = response.bytes().await.map_err(ConnectorError::Transport)?;
    let body: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        &bytes
    };
    serde_json::from_slice(body).map_err(|err| {
        counter!(
            "bot_connector_errors_total",
            "kind" => "decode",
            "endpoint" => endpoint
        )
        .increment(1);
        ConnectorError::Decode(err.into())
    })
}

pub(crate) fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
}
