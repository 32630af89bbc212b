use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Validation, decode, decode_header};
use serde_json::Value;
use tracing::warn;

use super::claims::ClaimsIdentity;
use super::constants;
use super::openid::OpenIdMetadata;
use crate::error::AuthenticationError;

/// Issuer and lifetime rules applied to a bearer token.
#[derive(Debug, Clone)]
pub struct TokenValidationParameters {
    pub valid_issuers: Vec<String>,
    pub validate_lifetime: bool,
    pub clock_skew_secs: u64,
}

impl TokenValidationParameters {
    pub fn new<I, S>(issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            valid_issuers: issuers.into_iter().map(Into::into).collect(),
            validate_lifetime: true,
            clock_skew_secs: constants::DEFAULT_CLOCK_SKEW_SECS,
        }
    }

    pub fn to_bot_from_channel() -> Self {
        Self::new([constants::TO_BOT_FROM_CHANNEL_TOKEN_ISSUER])
    }

    pub fn to_bot_from_emulator() -> Self {
        Self::new(constants::EMULATOR_ISSUERS)
    }
}

/// Returns true when `endorsements` allow `expected`. An empty expectation
/// is always satisfied.
pub fn validate_endorsement(expected: &str, endorsements: &[String]) -> bool {
    expected.is_empty() || endorsements.iter().any(|e| e == expected)
}

/// Reads the payload of a JWT without checking its signature.
pub(crate) fn peek_claims(token: &str) -> Option<HashMap<String, Value>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Splits an `Authorization` header into its bearer token.
pub(crate) fn bearer_token(auth_header: &str) -> Option<&str> {
    let mut parts = auth_header.split(' ');
    let (scheme, token) = (parts.next()?, parts.next()?);
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}

pub struct JwtTokenExtractor {
    parameters: TokenValidationParameters,
    metadata: Arc<OpenIdMetadata>,
}

impl JwtTokenExtractor {
    pub fn new(parameters: TokenValidationParameters, metadata: Arc<OpenIdMetadata>) -> Self {
        Self {
            parameters,
            metadata,
        }
    }

    /// Validates the token in `auth_header`. Headers that are not bearer
    /// tokens from an allowed issuer produce `Ok(None)`.
    pub async fn get_identity(
        &self,
        auth_header: &str,
        channel_id: &str,
        required_endorsements: &[String],
    ) -> Result<Option<ClaimsIdentity>, AuthenticationError> {
        let Some(token) = bearer_token(auth_header) else {
            return Ok(None);
        };
        if !self.has_allowed_issuer(token) {
            return Ok(None);
        }
        self.validate_token(token, channel_id, required_endorsements)
            .await
    }

    fn has_allowed_issuer(&self, token: &str) -> bool {
        peek_claims(token)
            .and_then(|claims| claims.get(constants::ISSUER_CLAIM).cloned())
            .and_then(|iss| iss.as_str().map(str::to_string))
            .map(|iss| self.parameters.valid_issuers.iter().any(|v| *v == iss))
            .unwrap_or(false)
    }

    async fn validate_token(
        &self,
        token: &str,
        channel_id: &str,
        required_endorsements: &[String],
    ) -> Result<Option<ClaimsIdentity>, AuthenticationError> {
        let header = decode_header(token).map_err(AuthenticationError::InvalidToken)?;
        let Some(key_id) = header.kid.as_deref() else {
            return Ok(None);
        };
        let Some(key) = self.metadata.get_key(key_id).await else {
            return Ok(None);
        };

        let algorithm = format!("{:?}", header.alg);
        if !constants::ALLOWED_SIGNING_ALGORITHMS.contains(&algorithm.as_str()) {
            return Err(AuthenticationError::Algorithm(algorithm));
        }

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&self.parameters.valid_issuers);
        validation.validate_aud = false;
        validation.validate_exp = self.parameters.validate_lifetime;
        validation.leeway = self.parameters.clock_skew_secs;
        if !self.parameters.validate_lifetime {
            validation.required_spec_claims.clear();
        }

        let decoded = decode::<HashMap<String, Value>>(token, &key.decoding_key, &validation)
            .map_err(|err| {
                warn!(error = %err, key_id, "jwt verification failed");
                AuthenticationError::InvalidToken(err)
            })?;

        if let Some(endorsements) = key.endorsements.as_deref() {
            if !validate_endorsement(channel_id, endorsements) {
                return Err(AuthenticationError::Endorsement {
                    key_id: key.key_id.clone(),
                });
            }
            if !required_endorsements
                .iter()
                .all(|required| validate_endorsement(required, endorsements))
            {
                return Err(AuthenticationError::Endorsement { key_id: key.key_id });
            }
        }

        Ok(Some(ClaimsIdentity::from_jwt_claims(decoded.claims)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_requires_two_parts() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer a b"), None);
    }

    #[test]
    fn endorsement_rules() {
        let endorsements = vec!["msteams".to_string()];
        assert!(validate_endorsement("", &endorsements));
        assert!(validate_endorsement("msteams", &endorsements));
        assert!(!validate_endorsement("slack", &endorsements));
    }

    #[test]
    fn peek_reads_unverified_payload() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"iss":"x"}"#);
        let token = format!("e30.{payload}.sig");
        let claims = peek_claims(&token).unwrap();
        assert_eq!(claims["iss"], "x");
        assert!(peek_claims("not-a-token").is_none());
    }
}
