use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::trace;

use super::object_path::{get_path_value, remove_path_value, set_path_value};
use super::scopes::{
    BotStateMemoryScope, DialogContextMemoryScope, DialogMemoryScope, MemoryScope,
    SettingsMemoryScope, ThisMemoryScope, TurnMemoryScope,
};
use crate::dialog_context::DialogContext;
use crate::error::DialogError;

/// Rewrites shorthand prefixes into full memory paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    alias: &'static str,
    prefix: &'static str,
    first_only: bool,
}

impl PathResolver {
    pub const fn new(alias: &'static str, prefix: &'static str) -> Self {
        Self {
            alias,
            prefix,
            first_only: false,
        }
    }

    pub fn default_resolvers() -> Vec<PathResolver> {
        vec![
            Self::new("$", "dialog."),
            Self::new("#", "turn.recognized.intents."),
            Self::new("@@", "turn.recognized.entities."),
            Self {
                alias: "@",
                prefix: "turn.recognized.entities.",
                first_only: true,
            },
        ]
    }

    fn resolve(&self, path: &str) -> Option<(String, bool)> {
        let rest = path.strip_prefix(self.alias)?;
        if rest.is_empty() {
            return None;
        }
        Some((format!("{}{rest}", self.prefix), self.first_only))
    }
}

/// Reads and writes dialog memory through scoped paths such as
/// `user.name`, `dialog.values.count` or `$count`.
#[derive(Clone)]
pub struct DialogStateManager {
    dc: DialogContext,
    scopes: Vec<Arc<dyn MemoryScope>>,
    resolvers: Vec<PathResolver>,
}

impl DialogStateManager {
    pub fn new(dc: DialogContext) -> Self {
        Self {
            dc,
            scopes: vec![
                Arc::new(TurnMemoryScope),
                Arc::new(SettingsMemoryScope),
                Arc::new(DialogMemoryScope),
                Arc::new(DialogContextMemoryScope),
                Arc::new(ThisMemoryScope),
                Arc::new(BotStateMemoryScope::conversation()),
                Arc::new(BotStateMemoryScope::user()),
            ],
            resolvers: PathResolver::default_resolvers(),
        }
    }

    pub fn with_scope(mut self, scope: Arc<dyn MemoryScope>) -> Self {
        self.scopes.push(scope);
        self
    }

    pub fn with_resolver(mut self, resolver: PathResolver) -> Self {
        // Longer aliases win over their own prefixes (`@@` before `@`).
        let position = self
            .resolvers
            .iter()
            .position(|existing| existing.alias.len() < resolver.alias.len())
            .unwrap_or(self.resolvers.len());
        self.resolvers.insert(position, resolver);
        self
    }

    pub fn scope(&self, name: &str) -> Option<&Arc<dyn MemoryScope>> {
        self.scopes
            .iter()
            .find(|scope| scope.name().eq_ignore_ascii_case(name))
    }

    /// Expands aliases. The flag asks for the first element of an array.
    fn transform_path(&self, path: &str) -> (String, bool) {
        let path = path.trim();
        self.resolvers
            .iter()
            .find_map(|resolver| resolver.resolve(path))
            .unwrap_or_else(|| (path.to_string(), false))
    }

    fn split<'p>(&self, path: &'p str) -> Result<(&Arc<dyn MemoryScope>, Option<&'p str>), DialogError> {
        let (name, rest) = match path.find(['.', '[']) {
            Some(index) => {
                let rest = &path[index..];
                (&path[..index], Some(rest.strip_prefix('.').unwrap_or(rest)))
            }
            None => (path, None),
        };
        if name.is_empty() {
            return Err(DialogError::InvalidPath(path.to_string()));
        }
        let scope = self
            .scope(name)
            .ok_or_else(|| DialogError::UnknownScope(name.to_string()))?;
        Ok((scope, rest.filter(|rest| !rest.is_empty())))
    }

    pub fn get_value(&self, path: &str) -> Result<Option<Value>, DialogError> {
        let (path, first_only) = self.transform_path(path);
        let (scope, rest) = self.split(&path)?;
        let Some(memory) = scope.get_memory(&self.dc) else {
            return Ok(None);
        };
        let value = match rest {
            None => Some(memory),
            Some(rest) => get_path_value(&memory, rest)?.cloned(),
        };
        Ok(match value {
            Some(Value::Array(items)) if first_only => items.into_iter().next(),
            other => other,
        })
    }

    /// Typed read. Values that do not convert read as `None`.
    pub fn get_value_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, DialogError> {
        Ok(self
            .get_value(path)?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    pub fn set_value(&self, path: &str, value: Value) -> Result<(), DialogError> {
        let (path, _) = self.transform_path(path);
        let (scope, rest) = self.split(&path)?;
        trace!(path = %path, "set memory value");
        match rest {
            None => scope.set_memory(&self.dc, value),
            Some(rest) => {
                let mut memory = scope
                    .get_memory(&self.dc)
                    .unwrap_or_else(|| Value::Object(Map::new()));
                set_path_value(&mut memory, rest, value)?;
                scope.set_memory(&self.dc, memory)
            }
        }
    }

    pub fn remove_value(&self, path: &str) -> Result<bool, DialogError> {
        let (path, _) = self.transform_path(path);
        let (scope, rest) = self.split(&path)?;
        let Some(rest) = rest else {
            return Err(DialogError::InvalidPath(path.clone()));
        };
        let Some(mut memory) = scope.get_memory(&self.dc) else {
            return Ok(false);
        };
        let removed = remove_path_value(&mut memory, rest)?;
        if removed {
            scope.set_memory(&self.dc, memory)?;
        }
        Ok(removed)
    }

    /// Every snapshot-enabled scope, keyed by scope name.
    pub fn get_memory_snapshot(&self) -> Value {
        let snapshot = self
            .scopes
            .iter()
            .filter(|scope| scope.include_in_snapshot())
            .filter_map(|scope| {
                scope
                    .get_memory(&self.dc)
                    .map(|memory| (scope.name().to_string(), memory))
            })
            .collect::<Map<_, _>>();
        Value::Object(snapshot)
    }

    pub async fn load_all_scopes(&self, force: bool) -> Result<(), DialogError> {
        for scope in &self.scopes {
            scope.load(&self.dc, force).await?;
        }
        Ok(())
    }

    pub async fn save_all_changes(&self, force: bool) -> Result<(), DialogError> {
        for scope in &self.scopes {
            scope.save_changes(&self.dc, force).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolvers_expand_shorthand_paths() {
        let resolvers = PathResolver::default_resolvers();
        let expand = |path: &str| {
            resolvers
                .iter()
                .find_map(|resolver| resolver.resolve(path))
        };
        assert_eq!(expand("$name"), Some(("dialog.name".to_string(), false)));
        assert_eq!(
            expand("#BookFlight"),
            Some(("turn.recognized.intents.BookFlight".to_string(), false))
        );
        assert_eq!(
            expand("@@city"),
            Some(("turn.recognized.entities.city".to_string(), false))
        );
        assert_eq!(
            expand("@city"),
            Some(("turn.recognized.entities.city".to_string(), true))
        );
        assert_eq!(expand("user.name"), None);
        assert_eq!(expand("$"), None);
    }
}
