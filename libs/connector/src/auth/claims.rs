use std::collections::HashMap;

use serde_json::Value;

use super::constants;

/// Claims carried by an authenticated (or anonymous) caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsIdentity {
    auth_type: String,
    authenticated: bool,
    claims: HashMap<String, String>,
}

impl ClaimsIdentity {
    pub fn new(auth_type: impl Into<String>, claims: HashMap<String, String>) -> Self {
        let auth_type = auth_type.into();
        Self {
            authenticated: !auth_type.is_empty(),
            auth_type,
            claims,
        }
    }

    pub fn anonymous() -> Self {
        Self::new(constants::ANONYMOUS_AUTH_TYPE, HashMap::new())
    }

    /// Flattens decoded JWT claims. Non-string values keep their JSON text,
    /// except arrays where the first element is used (`aud` may be a list).
    pub fn from_jwt_claims(raw: HashMap<String, Value>) -> Self {
        let claims = raw
            .into_iter()
            .filter_map(|(key, value)| {
                let flat = match value {
                    Value::String(s) => s,
                    Value::Array(items) => match items.into_iter().next() {
                        Some(Value::String(s)) => s,
                        Some(other) => other.to_string(),
                        None => return None,
                    },
                    Value::Null => return None,
                    other => other.to_string(),
                };
                Some((key, flat))
            })
            .collect();
        Self::new("Bearer", claims)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn auth_type(&self) -> &str {
        &self.auth_type
    }

    pub fn claims(&self) -> &HashMap<String, String> {
        &self.claims
    }

    pub fn claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).map(String::as_str)
    }

    pub fn issuer(&self) -> Option<&str> {
        self.claim(constants::ISSUER_CLAIM)
    }

    pub fn audience(&self) -> Option<&str> {
        self.claim(constants::AUDIENCE_CLAIM)
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(name.into(), value.into());
        self
    }
}
