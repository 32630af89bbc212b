//! Inbound request authentication.

mod claims;
pub mod constants;
mod extractor;
mod openid;
mod validation;

pub use claims::ClaimsIdentity;
pub use extractor::{JwtTokenExtractor, TokenValidationParameters, validate_endorsement};
pub use openid::{HttpJwksSource, Jwk, JwksSource, OpenIdMetadata, SigningKey, StaticJwksSource};
pub use validation::{
    ChannelValidation, EmulatorValidation, JwtTokenValidation, SkillValidation,
    get_app_id_from_claims,
};
