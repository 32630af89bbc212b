use std::collections::HashMap;
use std::sync::Arc;

use bot_schema::Activity;
use tracing::debug;

use super::claims::ClaimsIdentity;
use super::constants;
use super::extractor::{JwtTokenExtractor, TokenValidationParameters, bearer_token, peek_claims};
use super::openid::OpenIdMetadata;
use crate::credentials::{CredentialProvider, MicrosoftAppCredentials};
use crate::error::AuthenticationError;

/// App id of the caller: `appid` on v1 tokens, `azp` on v2 tokens.
pub fn get_app_id_from_claims(claims: &HashMap<String, String>) -> Option<String> {
    match claims.get(constants::VERSION_CLAIM).map(String::as_str) {
        None | Some("") | Some("1.0") => claims.get(constants::APPID_CLAIM).cloned(),
        Some("2.0") => claims.get(constants::AUTHORIZED_PARTY).cloned(),
        Some(_) => None,
    }
}

/// Tokens minted by the channel service.
pub struct ChannelValidation {
    extractor: JwtTokenExtractor,
}

impl ChannelValidation {
    pub fn new(metadata: Arc<OpenIdMetadata>) -> Self {
        Self {
            extractor: JwtTokenExtractor::new(
                TokenValidationParameters::to_bot_from_channel(),
                metadata,
            ),
        }
    }

    pub fn from_shared_metadata() -> Self {
        Self::new(OpenIdMetadata::shared(
            constants::TO_BOT_FROM_CHANNEL_OPENID_METADATA_URL,
        ))
    }

    pub async fn authenticate_token(
        &self,
        auth_header: &str,
        credentials: &dyn CredentialProvider,
        channel_id: &str,
        service_url: Option<&str>,
    ) -> Result<ClaimsIdentity, AuthenticationError> {
        let identity = self
            .extractor
            .get_identity(auth_header, channel_id, &[])
            .await?
            .ok_or(AuthenticationError::InvalidIdentity)?;
        if !identity.is_authenticated() {
            return Err(AuthenticationError::NotAuthenticated);
        }
        if !identity
            .issuer()
            .is_some_and(|iss| iss.eq_ignore_ascii_case(constants::TO_BOT_FROM_CHANNEL_TOKEN_ISSUER))
        {
            return Err(AuthenticationError::NotAuthenticated);
        }

        let app_id = identity
            .audience()
            .filter(|aud| !aud.is_empty())
            .ok_or(AuthenticationError::NotAuthenticated)?;
        if !credentials.is_valid_app_id(app_id).await {
            return Err(AuthenticationError::InvalidAppId(app_id.to_string()));
        }

        if let Some(service_url) = service_url {
            let claimed = identity.claim(constants::SERVICE_URL_CLAIM).ok_or_else(|| {
                AuthenticationError::InvalidClaims(format!(
                    "'{}' claim is required on channel tokens",
                    constants::SERVICE_URL_CLAIM
                ))
            })?;
            if !claimed.eq_ignore_ascii_case(service_url) {
                return Err(AuthenticationError::InvalidClaims(format!(
                    "'{}' claim does not match service url provided ({service_url})",
                    constants::SERVICE_URL_CLAIM
                )));
            }
        }
        Ok(identity)
    }
}

/// Tokens minted for the Bot Framework Emulator.
pub struct EmulatorValidation {
    extractor: JwtTokenExtractor,
}

impl EmulatorValidation {
    pub fn new(metadata: Arc<OpenIdMetadata>) -> Self {
        Self {
            extractor: JwtTokenExtractor::new(
                TokenValidationParameters::to_bot_from_emulator(),
                metadata,
            ),
        }
    }

    pub fn from_shared_metadata() -> Self {
        Self::new(OpenIdMetadata::shared(
            constants::TO_BOT_FROM_EMULATOR_OPENID_METADATA_URL,
        ))
    }

    /// Cheap pre-check on the unverified issuer.
    pub fn is_token_from_emulator(auth_header: &str) -> bool {
        bearer_token(auth_header)
            .and_then(peek_claims)
            .and_then(|claims| {
                claims
                    .get(constants::ISSUER_CLAIM)
                    .and_then(|v| v.as_str().map(str::to_string))
            })
            .map(|iss| constants::EMULATOR_ISSUERS.contains(&iss.as_str()))
            .unwrap_or(false)
    }

    pub async fn authenticate_token(
        &self,
        auth_header: &str,
        credentials: &dyn CredentialProvider,
        channel_id: &str,
    ) -> Result<ClaimsIdentity, AuthenticationError> {
        let identity = self
            .extractor
            .get_identity(auth_header, channel_id, &[])
            .await?
            .ok_or(AuthenticationError::InvalidIdentity)?;
        if !identity.is_authenticated() {
            return Err(AuthenticationError::NotAuthenticated);
        }

        let version = identity.claim(constants::VERSION_CLAIM).ok_or_else(|| {
            AuthenticationError::InvalidClaims(format!(
                "'{}' claim is required on emulator tokens",
                constants::VERSION_CLAIM
            ))
        })?;
        let app_id = match version {
            "" | "1.0" => identity.claim(constants::APPID_CLAIM).ok_or_else(|| {
                AuthenticationError::InvalidClaims(format!(
                    "'{}' claim is required on emulator token version '1.0'",
                    constants::APPID_CLAIM
                ))
            })?,
            "2.0" => identity.claim(constants::AUTHORIZED_PARTY).ok_or_else(|| {
                AuthenticationError::InvalidClaims(format!(
                    "'{}' claim is required on emulator token version '2.0'",
                    constants::AUTHORIZED_PARTY
                ))
            })?,
            other => {
                return Err(AuthenticationError::InvalidClaims(format!(
                    "unknown emulator token version '{other}'"
                )));
            }
        };

        if !credentials.is_valid_app_id(app_id).await {
            return Err(AuthenticationError::InvalidAppId(app_id.to_string()));
        }
        Ok(identity)
    }
}

pub struct SkillValidation;

impl SkillValidation {
    /// A skill claim either comes from the anonymous skill identity or names
    /// an audience that differs from its own app id.
    pub fn is_skill_claim(claims: &HashMap<String, String>) -> bool {
        if claims.get(constants::APPID_CLAIM).map(String::as_str)
            == Some(constants::ANONYMOUS_SKILL_APPID)
        {
            return true;
        }
        if !claims.contains_key(constants::VERSION_CLAIM) {
            return false;
        }
        let Some(audience) = claims.get(constants::AUDIENCE_CLAIM) else {
            return false;
        };
        if audience == constants::TO_BOT_FROM_CHANNEL_TOKEN_ISSUER {
            return false;
        }
        match get_app_id_from_claims(claims) {
            Some(app_id) if !app_id.trim().is_empty() => app_id != *audience,
            _ => false,
        }
    }

    pub fn is_skill_token(auth_header: &str) -> bool {
        bearer_token(auth_header)
            .and_then(peek_claims)
            .map(ClaimsIdentity::from_jwt_claims)
            .map(|identity| Self::is_skill_claim(identity.claims()))
            .unwrap_or(false)
    }

    pub fn create_anonymous_skill_claim() -> ClaimsIdentity {
        let mut claims = HashMap::new();
        claims.insert(
            constants::APPID_CLAIM.to_string(),
            constants::ANONYMOUS_SKILL_APPID.to_string(),
        );
        ClaimsIdentity::new(constants::ANONYMOUS_AUTH_TYPE, claims)
    }
}

/// Entry point used by adapters to authenticate inbound requests.
pub struct JwtTokenValidation {
    channel: ChannelValidation,
    emulator: EmulatorValidation,
}

impl Default for JwtTokenValidation {
    fn default() -> Self {
        Self {
            channel: ChannelValidation::from_shared_metadata(),
            emulator: EmulatorValidation::from_shared_metadata(),
        }
    }
}

impl JwtTokenValidation {
    pub fn new(channel: ChannelValidation, emulator: EmulatorValidation) -> Self {
        Self { channel, emulator }
    }

    /// Authenticates an inbound activity. A missing header is only accepted
    /// when authentication is disabled, yielding an anonymous identity.
    pub async fn authenticate_request(
        &self,
        activity: &Activity,
        auth_header: Option<&str>,
        credentials: &dyn CredentialProvider,
    ) -> Result<ClaimsIdentity, AuthenticationError> {
        let auth_header = auth_header.map(str::trim).unwrap_or_default();
        if auth_header.is_empty() {
            if credentials.is_authentication_disabled().await {
                debug!("authentication disabled; accepting anonymous request");
                return Ok(ClaimsIdentity::anonymous());
            }
            return Err(AuthenticationError::MissingAuthHeader);
        }

        let identity = self
            .validate_auth_header(
                auth_header,
                credentials,
                activity.channel_id(),
                activity.service_url.as_deref(),
            )
            .await?;
        if let Some(service_url) = activity.service_url.as_deref() {
            MicrosoftAppCredentials::trust_service_url(service_url);
        }
        Ok(identity)
    }

    pub async fn validate_auth_header(
        &self,
        auth_header: &str,
        credentials: &dyn CredentialProvider,
        channel_id: &str,
        service_url: Option<&str>,
    ) -> Result<ClaimsIdentity, AuthenticationError> {
        if auth_header.is_empty() {
            return Err(AuthenticationError::MissingAuthHeader);
        }
        if EmulatorValidation::is_token_from_emulator(auth_header) {
            return self
                .emulator
                .authenticate_token(auth_header, credentials, channel_id)
                .await;
        }
        self.channel
            .authenticate_token(auth_header, credentials, channel_id, service_url)
            .await
    }
}
