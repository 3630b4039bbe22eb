//! The Action contract and its registry.
//!
//! Every workflow step and every specialist action runs through [`Action`]:
//! `run(params, context) -> Ok(result) | Err(reason)`. Domain logic lives
//! entirely behind this trait.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ActionError, SpecError, SpecResult};

/// JSON object used for params and context.
pub type JsonMap = serde_json::Map<String, Value>;

/// Result of one action invocation.
pub type ActionResult = std::result::Result<Value, ActionError>;

/// A unit of work invoked by the engine.
#[async_trait]
pub trait Action: Send + Sync {
    /// Stable identifier used in config, audit entries and telemetry.
    fn name(&self) -> &str;

    async fn run(&self, params: &JsonMap, context: &JsonMap) -> ActionResult;
}

type SyncFn = dyn Fn(&JsonMap, &JsonMap) -> ActionResult + Send + Sync;

/// Adapter turning a synchronous closure into an [`Action`].
pub struct FnAction {
    name: String,
    func: Box<SyncFn>,
}

impl FnAction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&JsonMap, &JsonMap) -> ActionResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

impl std::fmt::Debug for FnAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Action for FnAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, params: &JsonMap, context: &JsonMap) -> ActionResult {
        (self.func)(params, context)
    }
}

/// Shorthand for `Arc::new(FnAction::new(..))`.
pub fn action_fn<F>(name: impl Into<String>, func: F) -> Arc<dyn Action>
where
    F: Fn(&JsonMap, &JsonMap) -> ActionResult + Send + Sync + 'static,
{
    Arc::new(FnAction::new(name, func))
}

/// Maps stable action identifiers to implementations.
///
/// Identifiers are resolved once, when a spec or agent config is loaded, so
/// an unknown identifier fails fast instead of at invocation time.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under its own name.
    pub fn register(&mut self, action: Arc<dyn Action>) -> SpecResult<()> {
        let name = action.name().to_string();
        if self.actions.contains_key(&name) {
            return Err(SpecError::DuplicateAction { action: name });
        }
        self.actions.insert(name, action);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> SpecResult<Arc<dyn Action>> {
        self.actions
            .get(name)
            .cloned()
            .ok_or_else(|| SpecError::UnknownAction {
                action: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fn_action_passes_params_through() {
        let action = FnAction::new("echo", |params, _ctx| Ok(Value::Object(params.clone())));
        let mut params = JsonMap::new();
        params.insert("x".to_string(), json!(1));

        let out = action.run(&params, &JsonMap::new()).await.unwrap();
        assert_eq!(out, json!({"x": 1}));
        assert_eq!(action.name(), "echo");
    }

    #[test]
    fn registry_rejects_duplicates_and_unknown_names() {
        let mut registry = ActionRegistry::new();
        registry
            .register(action_fn("scan", |_, _| Ok(json!({}))))
            .unwrap();

        let dup = registry.register(action_fn("scan", |_, _| Ok(json!({}))));
        assert!(matches!(dup, Err(SpecError::DuplicateAction { .. })));

        assert!(registry.resolve("scan").is_ok());
        assert!(matches!(
            registry.resolve("missing"),
            Err(SpecError::UnknownAction { .. })
        ));
        assert_eq!(registry.names(), vec!["scan".to_string()]);
    }
}
