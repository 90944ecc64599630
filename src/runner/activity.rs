use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::core::ErrorInfo;

/// What an activity handler produces: a JSON result, or a structured
/// failure that the engine will normalize and count against the retry
/// policy.
pub type ActivityResult = std::result::Result<Value, ErrorInfo>;

type BoxedActivity =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = ActivityResult> + Send>> + Send + Sync>;

/// Action name → async handler lookup.
///
/// Engine-scoped, not process-global: build one per deployment and hand it
/// to the runner.
///
/// # Example
///
/// ```ignore
/// let mut activities = ActivityRegistry::new();
/// activities.register("increment", |input| async move {
///     Ok(json!({"to": input["to"]}))
/// });
/// ```
#[derive(Default)]
pub struct ActivityRegistry {
    handlers: HashMap<String, BoxedActivity>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, action: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActivityResult> + Send + 'static,
    {
        let action = action.into();
        debug!(action = %action, "registered activity");
        self.handlers
            .insert(action, Arc::new(move |input| Box::pin(handler(input))));
    }

    pub(crate) fn get(&self, action: &str) -> Option<BoxedActivity> {
        self.handlers.get(action).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
