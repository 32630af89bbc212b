use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bot_schema::{Activity, SignInResource, TokenExchangeRequest, TokenResponse, TokenStatus};
use http::StatusCode;
use metrics::counter;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::conversations::map_response;
use crate::credentials::AppCredentials;
use crate::error::ConnectorError;

/// OAuth user-token operations against the token service.
#[async_trait]
pub trait UserTokenApi: Send + Sync {
    /// `Ok(None)` when the user has no token for the connection.
    async fn get_user_token(
        &self,
        user_id: &str,
        connection_name: &str,
        channel_id: &str,
        magic_code: Option<&str>,
    ) -> Result<Option<TokenResponse>, ConnectorError>;

    async fn get_sign_in_resource(
        &self,
        connection_name: &str,
        activity: &Activity,
        final_redirect: Option<&str>,
    ) -> Result<SignInResource, ConnectorError>;

    async fn sign_out_user(
        &self,
        user_id: &str,
        connection_name: Option<&str>,
        channel_id: &str,
    ) -> Result<(), ConnectorError>;

    async fn get_token_status(
        &self,
        user_id: &str,
        channel_id: &str,
        include_filter: Option<&str>,
    ) -> Result<Vec<TokenStatus>, ConnectorError>;

    async fn exchange_token(
        &self,
        user_id: &str,
        connection_name: &str,
        channel_id: &str,
        request: &TokenExchangeRequest,
    ) -> Result<Option<TokenResponse>, ConnectorError>;
}

pub struct RestUserTokenClient {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn AppCredentials>,
}

impl RestUserTokenClient {
    pub fn new(
        client: Client,
        base_url: &str,
        credentials: Arc<dyn AppCredentials>,
    ) -> Result<Self, ConnectorError> {
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|err| ConnectorError::Config(err.into()))?;
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ConnectorError> {
        self.base_url
            .join(path)
            .map_err(|err| ConnectorError::Config(err.into()))
    }

    async fn send(
        &self,
        endpoint: &'static str,
        builder: RequestBuilder,
    ) -> Result<reqwest::Response, ConnectorError> {
        let builder = match self.credentials.get_token().await? {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        builder.send().await.map_err(|err| {
            counter!(
                "bot_connector_errors_total",
                "kind" => "transport",
                "endpoint" => endpoint
            )
            .increment(1);
            ConnectorError::Transport(err)
        })
    }

    async fn optional<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        builder: RequestBuilder,
    ) -> Result<Option<T>, ConnectorError> {
        let response = self.send(endpoint, builder).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        map_response(endpoint, response).await.map(Some)
    }

    fn sign_in_state(&self, connection_name: &str, activity: &Activity) -> String {
        let state = json!({
            "connectionName": connection_name,
            "conversation": activity.get_conversation_reference(),
            "relatesTo": activity.relates_to,
            "msAppId": self.credentials.app_id(),
        });
        STANDARD.encode(state.to_string())
    }
}

#[async_trait]
impl UserTokenApi for RestUserTokenClient {
    async fn get_user_token(
        &self,
        user_id: &str,
        connection_name: &str,
        channel_id: &str,
        magic_code: Option<&str>,
    ) -> Result<Option<TokenResponse>, ConnectorError> {
        let url = self.endpoint("api/usertoken/GetToken")?;
        let mut query = vec![
            ("userId", user_id),
            ("connectionName", connection_name),
            ("channelId", channel_id),
        ];
        if let Some(code) = magic_code {
            query.push(("code", code));
        }
        self.optional("usertoken.get", self.client.get(url).query(&query))
            .await
    }

    async fn get_sign_in_resource(
        &self,
        connection_name: &str,
        activity: &Activity,
        final_redirect: Option<&str>,
    ) -> Result<SignInResource, ConnectorError> {
        let url = self.endpoint("api/botsignin/GetSignInResource")?;
        let state = self.sign_in_state(connection_name, activity);
        let mut query = vec![("state", state.as_str())];
        if let Some(redirect) = final_redirect {
            query.push(("finalRedirect", redirect));
        }
        let response = self
            .send("botsignin.resource", self.client.get(url).query(&query))
            .await?;
        map_response("botsignin.resource", response).await
    }

    async fn sign_out_user(
        &self,
        user_id: &str,
        connection_name: Option<&str>,
        channel_id: &str,
    ) -> Result<(), ConnectorError> {
        let url = self.endpoint("api/usertoken/SignOut")?;
        let mut query = vec![("userId", user_id), ("channelId", channel_id)];
        if let Some(connection) = connection_name {
            query.push(("connectionName", connection));
        }
        let response = self
            .send("usertoken.signout", self.client.delete(url).query(&query))
            .await?;
        map_response::<serde_json::Value>("usertoken.signout", response)
            .await
            .map(|_| ())
    }

    async fn get_token_status(
        &self,
        user_id: &str,
        channel_id: &str,
        include_filter: Option<&str>,
    ) -> Result<Vec<TokenStatus>, ConnectorError> {
        let url = self.endpoint("api/usertoken/GetTokenStatus")?;
        let mut query = vec![("userId", user_id), ("channelId", channel_id)];
        if let Some(include) = include_filter {
            query.push(("include", include));
        }
        let response = self
            .send("usertoken.status", self.client.get(url).query(&query))
            .await?;
        map_response("usertoken.status", response).await
    }

    async fn exchange_token(
        &self,
        user_id: &str,
        connection_name: &str,
        channel_id: &str,
        request: &TokenExchangeRequest,
    ) -> Result<Option<TokenResponse>, ConnectorError> {
        let url = self.endpoint("api/usertoken/exchange")?;
        let query = [
            ("userId", user_id),
            ("connectionName", connection_name),
            ("channelId", channel_id),
        ];
        self.optional(
            "usertoken.exchange",
            self.client.post(url).query(&query).json(request),
        )
        .await
    }
}
