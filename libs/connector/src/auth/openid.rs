use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::DecodingKey;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::error::AuthenticationError;

const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const UNKNOWN_KEY_REFRESH: Duration = Duration::from_secs(60 * 60);

/// A signing key as published in a JWKS document. Bot Framework keys carry
/// the list of channels they are allowed to sign for.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kid: String,
    #[serde(default)]
    pub kty: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    #[serde(default)]
    pub endorsements: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct OpenIdConfiguration {
    jwks_uri: String,
}

#[derive(Clone)]
pub struct SigningKey {
    pub key_id: String,
    pub decoding_key: DecodingKey,
    pub endorsements: Option<Vec<String>>,
}

#[async_trait]
pub trait JwksSource: Send + Sync {
    async fn fetch(&self, metadata_url: &str) -> Result<Vec<Jwk>, AuthenticationError>;
}

/// Resolves the OpenID configuration document and then its `jwks_uri`.
pub struct HttpJwksSource {
    client: Client,
}

impl HttpJwksSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JwksSource for HttpJwksSource {
    async fn fetch(&self, metadata_url: &str) -> Result<Vec<Jwk>, AuthenticationError> {
        let config: OpenIdConfiguration = self
            .client
            .get(metadata_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|err| AuthenticationError::Metadata(err.to_string()))?
            .json()
            .await
            .map_err(|err| AuthenticationError::Metadata(err.to_string()))?;

        let set: JwkSet = self
            .client
            .get(&config.jwks_uri)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|err| AuthenticationError::Metadata(err.to_string()))?
            .json()
            .await
            .map_err(|err| AuthenticationError::Metadata(err.to_string()))?;
        Ok(set.keys)
    }
}

/// Fixed key set, for tests and air-gapped deployments.
pub struct StaticJwksSource {
    keys: Vec<Jwk>,
}

impl StaticJwksSource {
    pub fn new(keys: Vec<Jwk>) -> Self {
        Self { keys }
    }

    pub fn from_json(jwks: &str) -> Result<Self, serde_json::Error> {
        let set: JwkSet = serde_json::from_str(jwks)?;
        Ok(Self::new(set.keys))
    }
}

#[async_trait]
impl JwksSource for StaticJwksSource {
    async fn fetch(&self, _metadata_url: &str) -> Result<Vec<Jwk>, AuthenticationError> {
        Ok(self.keys.clone())
    }
}

#[derive(Default)]
struct KeyCache {
    keys: HashMap<String, Jwk>,
    last_updated: Option<Instant>,
}

impl KeyCache {
    fn older_than(&self, age: Duration) -> bool {
        self.last_updated
            .map(|at| at.elapsed() > age)
            .unwrap_or(true)
    }
}

static SHARED: Lazy<DashMap<String, Arc<OpenIdMetadata>>> = Lazy::new(DashMap::new);

/// Caches the signing keys published under one metadata URL.
pub struct OpenIdMetadata {
    url: String,
    source: Arc<dyn JwksSource>,
    cache: Mutex<KeyCache>,
}

impl OpenIdMetadata {
    pub fn new(url: impl Into<String>, source: Arc<dyn JwksSource>) -> Self {
        Self {
            url: url.into(),
            source,
            cache: Mutex::new(KeyCache::default()),
        }
    }

    /// Process-wide instance for `url`, fetched over HTTP.
    pub fn shared(url: &str) -> Arc<Self> {
        SHARED
            .entry(url.to_string())
            .or_insert_with(|| {
                Arc::new(Self::new(url, Arc::new(HttpJwksSource::new(Client::new()))))
            })
            .clone()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn get_key(&self, key_id: &str) -> Option<SigningKey> {
        let mut cache = self.cache.lock().await;
        if cache.older_than(CACHE_TTL) {
            self.refresh(&mut cache).await;
        }

        if let Some(key) = find_key(&cache, key_id) {
            return Some(key);
        }
        if cache.older_than(UNKNOWN_KEY_REFRESH) {
            self.refresh(&mut cache).await;
            return find_key(&cache, key_id);
        }
        warn!(key_id, url = %self.url, "signing key not found");
        None
    }

    async fn refresh(&self, cache: &mut KeyCache) {
        match self.source.fetch(&self.url).await {
            Ok(keys) => {
                cache.keys = keys.into_iter().map(|k| (k.kid.clone(), k)).collect();
                cache.last_updated = Some(Instant::now());
            }
            Err(err) => {
                error!(url = %self.url, error = %err, "failed to load openid configuration");
                cache.keys.clear();
                cache.last_updated = None;
            }
        }
    }
}

fn find_key(cache: &KeyCache, key_id: &str) -> Option<SigningKey> {
    let jwk = cache.keys.get(key_id)?;
    let (n, e) = (jwk.n.as_deref()?, jwk.e.as_deref()?);
    match DecodingKey::from_rsa_components(n, e) {
        Ok(decoding_key) => Some(SigningKey {
            key_id: jwk.kid.clone(),
            decoding_key,
            endorsements: jwk.endorsements.clone(),
        }),
        Err(err) => {
            warn!(key_id, error = %err, "failed to load signing key");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        keys: Vec<Jwk>,
    }

    #[async_trait]
    impl JwksSource for CountingSource {
        async fn fetch(&self, _url: &str) -> Result<Vec<Jwk>, AuthenticationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.keys.clone())
        }
    }

    fn fixture_keys() -> Vec<Jwk> {
        let set: JwkSet =
            serde_json::from_str(include_str!("../../tests/fixtures/jwks.json")).unwrap();
        set.keys
    }

    #[tokio::test]
    async fn caches_keys_between_lookups() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            keys: fixture_keys(),
        });
        let metadata = OpenIdMetadata::new("https://example.com/meta", source.clone());
        assert!(metadata.get_key("test-key").await.is_some());
        assert!(metadata.get_key("test-key").await.is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_key_within_an_hour_does_not_refetch() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            keys: fixture_keys(),
        });
        let metadata = OpenIdMetadata::new("https://example.com/meta", source.clone());
        assert!(metadata.get_key("missing").await.is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
