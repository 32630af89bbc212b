use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bot_connector::auth::{
    ChannelValidation, EmulatorValidation, JwtTokenValidation, OpenIdMetadata, SkillValidation,
    StaticJwksSource,
};
use bot_connector::{AuthenticationError, SimpleCredentialProvider};
use bot_schema::Activity;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};

const SERVICE_URL: &str = "https://smba.example.com/";

fn metadata() -> Arc<OpenIdMetadata> {
    let source = StaticJwksSource::from_json(include_str!("fixtures/jwks.json")).unwrap();
    Arc::new(OpenIdMetadata::new("https://metadata.test", Arc::new(source)))
}

fn validation() -> JwtTokenValidation {
    JwtTokenValidation::new(
        ChannelValidation::new(metadata()),
        EmulatorValidation::new(metadata()),
    )
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn sign(claims: Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("test-key".into());
    let key = EncodingKey::from_rsa_pem(include_bytes!("fixtures/test_signing_key.pem")).unwrap();
    encode(&header, &claims, &key).unwrap()
}

fn channel_token(aud: &str, service_url: &str, exp_offset: i64) -> String {
    sign(json!({
        "iss": "https://api.botframework.com",
        "aud": aud,
        "serviceurl": service_url,
        "exp": now() + exp_offset,
        "nbf": now() - 60,
    }))
}

fn activity(channel_id: &str) -> Activity {
    Activity {
        channel_id: Some(channel_id.into()),
        service_url: Some(SERVICE_URL.into()),
        ..Activity::message("hi")
    }
}

#[tokio::test]
async fn accepts_valid_channel_token() {
    let creds = SimpleCredentialProvider::new("app-id", "secret");
    let header = format!("Bearer {}", channel_token("app-id", SERVICE_URL, 600));
    let identity = validation()
        .authenticate_request(&activity("msteams"), Some(&header), &creds)
        .await
        .unwrap();
    assert!(identity.is_authenticated());
    assert_eq!(identity.audience(), Some("app-id"));
    assert!(!SkillValidation::is_skill_claim(identity.claims()));
}

#[tokio::test]
async fn rejects_mismatched_service_url() {
    let creds = SimpleCredentialProvider::new("app-id", "secret");
    let header = format!(
        "Bearer {}",
        channel_token("app-id", "https://other.example.com/", 600)
    );
    let err = validation()
        .authenticate_request(&activity("msteams"), Some(&header), &creds)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthenticationError::InvalidClaims(_)));
}

#[tokio::test]
async fn rejects_unknown_app_id() {
    let creds = SimpleCredentialProvider::new("app-id", "secret");
    let header = format!("Bearer {}", channel_token("someone-else", SERVICE_URL, 600));
    let err = validation()
        .authenticate_request(&activity("msteams"), Some(&header), &creds)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthenticationError::InvalidAppId(ref id) if id == "someone-else"));
}

#[tokio::test]
async fn rejects_channel_without_endorsement() {
    let creds = SimpleCredentialProvider::new("app-id", "secret");
    let header = format!("Bearer {}", channel_token("app-id", SERVICE_URL, 600));
    let err = validation()
        .authenticate_request(&activity("slack"), Some(&header), &creds)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthenticationError::Endorsement { .. }));
}

#[tokio::test]
async fn rejects_expired_token() {
    let creds = SimpleCredentialProvider::new("app-id", "secret");
    let header = format!("Bearer {}", channel_token("app-id", SERVICE_URL, -3600));
    let err = validation()
        .authenticate_request(&activity("msteams"), Some(&header), &creds)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthenticationError::InvalidToken(_)));
}

#[tokio::test]
async fn accepts_emulator_v2_token() {
    let creds = SimpleCredentialProvider::new("app-id", "secret");
    let token = sign(json!({
        "iss": "https://login.microsoftonline.com/d6d49420-f39b-4df7-a1dc-d59a935871db/v2.0",
        "aud": "app-id",
        "ver": "2.0",
        "azp": "app-id",
        "exp": now() + 600,
    }));
    let header = format!("Bearer {token}");
    assert!(EmulatorValidation::is_token_from_emulator(&header));
    let identity = validation()
        .authenticate_request(&activity("emulator"), Some(&header), &creds)
        .await
        .unwrap();
    assert_eq!(identity.claim("azp"), Some("app-id"));
}

#[tokio::test]
async fn emulator_v1_token_requires_appid() {
    let creds = SimpleCredentialProvider::new("app-id", "secret");
    let token = sign(json!({
        "iss": "https://sts.windows.net/f8cdef31-a31e-4b4a-93e4-5f571e91255a/",
        "ver": "1.0",
        "exp": now() + 600,
    }));
    let err = validation()
        .authenticate_request(&activity("emulator"), Some(&format!("Bearer {token}")), &creds)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthenticationError::InvalidClaims(_)));
}

#[tokio::test]
async fn missing_header_depends_on_auth_being_disabled() {
    let anonymous = validation()
        .authenticate_request(&activity("msteams"), None, &SimpleCredentialProvider::default())
        .await
        .unwrap();
    assert_eq!(anonymous.auth_type(), "anonymous");

    let err = validation()
        .authenticate_request(
            &activity("msteams"),
            None,
            &SimpleCredentialProvider::new("app-id", "secret"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AuthenticationError::MissingAuthHeader));
}

#[tokio::test]
async fn non_bearer_header_yields_invalid_identity() {
    let creds = SimpleCredentialProvider::new("app-id", "secret");
    let err = validation()
        .authenticate_request(&activity("msteams"), Some("Basic Zm9vOmJhcg=="), &creds)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthenticationError::InvalidIdentity));
}
