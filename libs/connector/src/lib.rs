//! Client bindings for the Bot Framework channel and token services.
//!
//! Outbound calls go through [`ConnectorApi`] and [`UserTokenApi`]; inbound
//! requests are authenticated with [`auth::JwtTokenValidation`].

pub mod auth;
mod conversations;
mod credentials;
mod error;
mod http;
pub mod retry;
mod user_token;

pub use conversations::{ConnectorApi, RestConnectorClient};
pub use credentials::{
    AppCredentials, CredentialProvider, MicrosoftAppCredentials, SimpleCredentialProvider,
};
pub use error::{AuthenticationError, ConnectorError};
pub use http::{HttpTransport, JsonRequest, ReqwestTransport};
pub use user_token::{RestUserTokenClient, UserTokenApi};
