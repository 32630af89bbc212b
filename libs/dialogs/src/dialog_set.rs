use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use bot_builder::telemetry::SharedTelemetryClient;
use bot_builder::{StatePropertyAccessor, TurnContext};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::dialog::{Dialog, DialogState};
use crate::dialog_context::DialogContext;
use crate::error::DialogError;

/// The dialogs a [`DialogContext`] can start, keyed by id.
pub struct DialogSet {
    dialogs: RwLock<BTreeMap<String, Arc<dyn Dialog>>>,
    accessor: Option<StatePropertyAccessor<DialogState>>,
    telemetry: RwLock<Option<SharedTelemetryClient>>,
}

impl DialogSet {
    /// A set whose stack is persisted through `accessor`.
    pub fn new(accessor: StatePropertyAccessor<DialogState>) -> Self {
        Self {
            dialogs: RwLock::new(BTreeMap::new()),
            accessor: Some(accessor),
            telemetry: RwLock::new(None),
        }
    }

    /// A set without its own storage, as used inside a component dialog.
    pub fn detached() -> Self {
        Self {
            dialogs: RwLock::new(BTreeMap::new()),
            accessor: None,
            telemetry: RwLock::new(None),
        }
    }

    pub fn add(&self, dialog: impl Dialog + 'static) -> String {
        self.add_shared(Arc::new(dialog))
    }

    /// Registers `dialog` and returns the id it is addressed by. A
    /// different dialog already registered under the same id pushes the
    /// new one to `id2`, `id3` and so on.
    pub fn add_shared(&self, dialog: Arc<dyn Dialog>) -> String {
        let mut dialogs = self.dialogs.write().unwrap_or_else(PoisonError::into_inner);
        let base = dialog.id().to_string();
        if let Some(existing) = dialogs.get(&base) {
            if std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(&dialog)) {
                return base;
            }
        }

        let mut key = base.clone();
        let mut suffix = 2;
        while dialogs.contains_key(&key) {
            key = format!("{base}{suffix}");
            suffix += 1;
        }
        if key != base {
            debug!(dialog_id = %base, key = %key, "dialog id already taken");
        }

        if let Some(client) = self
            .telemetry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            dialog.set_telemetry_client(client);
        }
        dialogs.insert(key.clone(), dialog);
        key
    }

    pub fn find(&self, dialog_id: &str) -> Option<Arc<dyn Dialog>> {
        self.dialogs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dialog_id)
            .cloned()
    }

    pub fn dialogs(&self) -> Vec<Arc<dyn Dialog>> {
        self.dialogs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Hash over the versions of every registered dialog.
    pub fn get_version(&self) -> String {
        let dialogs = self.dialogs.read().unwrap_or_else(PoisonError::into_inner);
        let mut hasher = Sha256::new();
        for dialog in dialogs.values() {
            hasher.update(dialog.version().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn telemetry_client(&self) -> Option<SharedTelemetryClient> {
        self.telemetry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sets the client on the set and on every dialog already added.
    pub fn set_telemetry_client(&self, client: SharedTelemetryClient) {
        *self.telemetry.write().unwrap_or_else(PoisonError::into_inner) = Some(client.clone());
        for dialog in self.dialogs() {
            dialog.set_telemetry_client(client.clone());
        }
    }

    /// Loads the persisted stack and wraps it in a root context.
    pub async fn create_context(
        self: &Arc<Self>,
        turn: &TurnContext,
    ) -> Result<DialogContext, DialogError> {
        let accessor = self
            .accessor
            .clone()
            .ok_or(DialogError::MissingStateAccessor)?;
        let state = accessor.get(turn, DialogState::default).await?;
        Ok(DialogContext::root(
            self.clone(),
            turn.clone(),
            state.dialog_stack,
            Some(accessor),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::DialogTurnResult;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl Dialog for Named {
        fn id(&self) -> &str {
            self.0
        }

        fn version(&self) -> String {
            self.1.to_string()
        }

        async fn begin_dialog(&self, _dc: &DialogContext, _options: Option<Value>) -> Result<DialogTurnResult> {
            Ok(DialogTurnResult::END_OF_TURN)
        }
    }

    #[test]
    fn colliding_ids_get_a_numeric_suffix() {
        let set = DialogSet::detached();
        assert_eq!(set.add(Named("ask", "v1")), "ask");
        assert_eq!(set.add(Named("ask", "v1")), "ask2");
        assert_eq!(set.add(Named("ask", "v1")), "ask3");
        assert!(set.find("ask2").is_some());
        assert!(set.find("missing").is_none());
    }

    #[test]
    fn re_adding_the_same_dialog_keeps_its_id() {
        let set = DialogSet::detached();
        let dialog: Arc<dyn Dialog> = Arc::new(Named("ask", "v1"));
        assert_eq!(set.add_shared(dialog.clone()), "ask");
        assert_eq!(set.add_shared(dialog), "ask");
        assert_eq!(set.dialogs().len(), 1);
    }

    #[test]
    fn version_tracks_member_versions() {
        let first = DialogSet::detached();
        first.add(Named("a", "1"));
        let second = DialogSet::detached();
        second.add(Named("a", "1"));
        assert_eq!(first.get_version(), second.get_version());
        assert_eq!(first.get_version().len(), 64);

        second.add(Named("b", "1"));
        assert_ne!(first.get_version(), second.get_version());
    }
}
