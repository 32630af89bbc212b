use std::env;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::auth::constants;
use crate::error::ConnectorError;

/// Source of the bearer token a bot presents to the channel service.
#[async_trait]
pub trait AppCredentials: Send + Sync {
    fn app_id(&self) -> &str;

    /// Returns `None` for anonymous credentials, which send no
    /// `Authorization` header at all.
    async fn get_token(&self) -> Result<Option<String>, ConnectorError>;
}

/// Validates the app ids found on inbound tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn is_valid_app_id(&self, app_id: &str) -> bool;
    async fn get_app_password(&self, app_id: &str) -> Option<String>;
    async fn is_authentication_disabled(&self) -> bool;
}

fn env_any(keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| env::var(key).ok())
        .filter(|value| !value.trim().is_empty())
}

#[derive(Debug, Clone, Default)]
pub struct SimpleCredentialProvider {
    app_id: String,
    password: String,
}

impl SimpleCredentialProvider {
    pub fn new(app_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            password: password.into(),
        }
    }

    /// Reads `MicrosoftAppId`/`MicrosoftAppPassword` (or their upper-snake
    /// spellings). Missing values leave authentication disabled.
    pub fn from_env() -> Self {
        Self::new(
            env_any(&["MicrosoftAppId", "MICROSOFT_APP_ID"]).unwrap_or_default(),
            env_any(&["MicrosoftAppPassword", "MICROSOFT_APP_PASSWORD"]).unwrap_or_default(),
        )
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }
}

#[async_trait]
impl CredentialProvider for SimpleCredentialProvider {
    async fn is_valid_app_id(&self, app_id: &str) -> bool {
        self.app_id == app_id
    }

    async fn get_app_password(&self, app_id: &str) -> Option<String> {
        (self.app_id == app_id).then(|| self.password.clone())
    }

    async fn is_authentication_disabled(&self) -> bool {
        self.app_id.trim().is_empty()
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

static TRUSTED_HOSTS: Lazy<DashMap<String, ()>> = Lazy::new(DashMap::new);

/// Client-credentials token source for the Bot Framework channel service.
pub struct MicrosoftAppCredentials {
    app_id: String,
    password: String,
    tenant: String,
    oauth_scope: String,
    login_endpoint: String,
    client: Client,
    cache: Mutex<Option<CachedToken>>,
}

impl MicrosoftAppCredentials {
    pub fn new(app_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            password: password.into(),
            tenant: constants::DEFAULT_CHANNEL_AUTH_TENANT.into(),
            oauth_scope: constants::TO_CHANNEL_FROM_BOT_OAUTH_SCOPE.into(),
            login_endpoint: constants::TO_CHANNEL_FROM_BOT_LOGIN_BASE.into(),
            client: Client::new(),
            cache: Mutex::new(None),
        }
    }

    pub fn anonymous() -> Self {
        Self::new("", "")
    }

    pub fn from_env() -> Self {
        let mut creds = Self::new(
            env_any(&["MicrosoftAppId", "MICROSOFT_APP_ID"]).unwrap_or_default(),
            env_any(&["MicrosoftAppPassword", "MICROSOFT_APP_PASSWORD"]).unwrap_or_default(),
        );
        if let Some(tenant) = env_any(&["MicrosoftAppTenantId", "MICROSOFT_APP_TENANT_ID"]) {
            creds.tenant = tenant;
        }
        creds
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    pub fn with_oauth_scope(mut self, scope: impl Into<String>) -> Self {
        self.oauth_scope = scope.into();
        self
    }

    pub fn with_login_endpoint(mut self, base: impl Into<String>) -> Self {
        self.login_endpoint = base.into();
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn token_url(&self) -> String {
        let base = self.login_endpoint.trim_end_matches('/');
        format!("{base}/{}/oauth2/v2.0/token", self.tenant)
    }

    /// Marks a service URL as trusted after an inbound request from it was
    /// authenticated.
    pub fn trust_service_url(service_url: &str) {
        if let Some(host) = host_of(service_url) {
            TRUSTED_HOSTS.insert(host, ());
        }
    }

    pub fn is_trusted_service_url(service_url: &str) -> bool {
        host_of(service_url)
            .map(|host| TRUSTED_HOSTS.contains_key(&host))
            .unwrap_or(false)
    }

    async fn fetch_token(&self) -> Result<CachedToken, ConnectorError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.app_id.as_str()),
            ("client_secret", self.password.as_str()),
            ("scope", self.oauth_scope.as_str()),
        ];
        let response = self
            .client
            .post(self.token_url())
            .form(&form)
            .send()
            .await
            .map_err(|err| {
                counter!("bot_connector_errors_total", "kind" => "token_transport").increment(1);
                ConnectorError::Transport(err)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            counter!(
                "bot_connector_errors_total",
                "kind" => "token_remote",
                "status" => status.as_str().to_string()
            )
            .increment(1);
            warn!(status = status.as_u16(), "app token request rejected");
            return Err(ConnectorError::Token(format!(
                "status={} body={}",
                status.as_u16(),
                body
            )));
        }

        let raw: RawTokenResponse = response
            .json()
            .await
            .map_err(|err| ConnectorError::Decode(err.into()))?;
        debug!(expires_in = raw.expires_in, "acquired app token");
        Ok(CachedToken {
            token: raw.access_token,
            expires_at: Instant::now() + Duration::from_secs(raw.expires_in.unwrap_or(3600)),
        })
    }
}

#[async_trait]
impl AppCredentials for MicrosoftAppCredentials {
    fn app_id(&self) -> &str {
        &self.app_id
    }

    async fn get_token(&self) -> Result<Option<String>, ConnectorError> {
        if self.app_id.trim().is_empty() {
            return Ok(None);
        }

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() + REFRESH_MARGIN < cached.expires_at {
                return Ok(Some(cached.token.clone()));
            }
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(Some(token))
    }
}

fn host_of(service_url: &str) -> Option<String> {
    url::Url::parse(service_url)
        .ok()
        .and_then(|url| url.host_str().map(|h| h.to_ascii_lowercase()))
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn anonymous_credentials_yield_no_token() {
        let creds = MicrosoftAppCredentials::anonymous();
        assert_eq!(creds.get_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn simple_provider_checks_app_id() {
        let provider = SimpleCredentialProvider::new("app", "secret");
        assert!(provider.is_valid_app_id("app").await);
        assert!(!provider.is_valid_app_id("other").await);
        assert_eq!(provider.get_app_password("app").await.as_deref(), Some("secret"));
        assert!(!provider.is_authentication_disabled().await);
        assert!(
            SimpleCredentialProvider::default()
                .is_authentication_disabled()
                .await
        );
    }

    #[test]
    fn token_url_uses_tenant() {
        let creds = MicrosoftAppCredentials::new("a", "b").with_tenant("contoso.com");
        assert_eq!(
            creds.token_url(),
            "https://login.microsoftonline.com/contoso.com/oauth2/v2.0/token"
        );
    }

    #[test]
    fn trusted_hosts_ignore_path() {
        MicrosoftAppCredentials::trust_service_url("https://smba.trafficmanager.net/amer/");
        assert!(MicrosoftAppCredentials::is_trusted_service_url(
            "https://SMBA.trafficmanager.net/emea/"
        ));
        assert!(!MicrosoftAppCredentials::is_trusted_service_url(
            "https://untrusted.example.com/"
        ));
    }
}
