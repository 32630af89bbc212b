//! Sample Bot Framework bot served over HTTP.
pub mod bot;
pub mod config;
pub mod http;

pub use bot::{EchoBot, UserProfile, profile_dialog};
pub use config::EchoBotConfig;
pub use http::{AppState, build_router};
