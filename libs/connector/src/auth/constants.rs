pub const TO_CHANNEL_FROM_BOT_LOGIN_BASE: &str = "https://login.microsoftonline.com";
pub const TO_CHANNEL_FROM_BOT_OAUTH_SCOPE: &str = "https://api.botframework.com/.default";
pub const DEFAULT_CHANNEL_AUTH_TENANT: &str = "botframework.com";

pub const TO_BOT_FROM_CHANNEL_TOKEN_ISSUER: &str = "https://api.botframework.com";
pub const TO_BOT_FROM_CHANNEL_OPENID_METADATA_URL: &str =
    "https://login.botframework.com/v1/.well-known/openidconfiguration";
pub const TO_BOT_FROM_EMULATOR_OPENID_METADATA_URL: &str =
    "https://login.microsoftonline.com/common/v2.0/.well-known/openid-configuration";

pub const OAUTH_URL: &str = "https://api.botframework.com";
pub const TOKEN_SERVICE_URL: &str = "https://token.botframework.com";

pub const ALLOWED_SIGNING_ALGORITHMS: [&str; 3] = ["RS256", "RS384", "RS512"];

pub const EMULATOR_ISSUERS: [&str; 4] = [
    "https://sts.windows.net/d6d49420-f39b-4df7-a1dc-d59a935871db/",
    "https://login.microsoftonline.com/d6d49420-f39b-4df7-a1dc-d59a935871db/v2.0",
    "https://sts.windows.net/f8cdef31-a31e-4b4a-93e4-5f571e91255a/",
    "https://login.microsoftonline.com/f8cdef31-a31e-4b4a-93e4-5f571e91255a/v2.0",
];

pub const AUTHORIZED_PARTY: &str = "azp";
pub const AUDIENCE_CLAIM: &str = "aud";
pub const ISSUER_CLAIM: &str = "iss";
pub const KEY_ID_HEADER: &str = "kid";
pub const SERVICE_URL_CLAIM: &str = "serviceurl";
pub const VERSION_CLAIM: &str = "ver";
pub const APPID_CLAIM: &str = "appid";

pub const ANONYMOUS_SKILL_APPID: &str = "AnonymousSkill";
pub const ANONYMOUS_AUTH_TYPE: &str = "anonymous";

pub const DEFAULT_CLOCK_SKEW_SECS: u64 = 5 * 60;
