use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};

pub const DEFAULT_BIND: &str = "0.0.0.0:3978";

#[derive(Debug, Clone)]
pub struct EchoBotConfig {
    pub addr: SocketAddr,
}

impl EchoBotConfig {
    /// Reads `BIND`, falling back to [`DEFAULT_BIND`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind = lookup("BIND")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let addr = bind
            .trim()
            .parse()
            .with_context(|| format!("invalid BIND address {bind:?}"))?;
        Ok(Self { addr })
    }
}
