use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::command::Command;
use crate::core::Event;

/// A pure decision function: `(ctx, history) → commands`.
///
/// Deciders must be deterministic in their inputs — the engine re-invokes
/// them from inside a CAS retry loop, and replay correctness depends on two
/// invocations over the same history producing identical command sequences.
pub trait Decider: Send + Sync {
    fn decide(&self, ctx: &Value, history: &[Event]) -> Vec<Command>;
}

impl<F> Decider for F
where
    F: Fn(&Value, &[Event]) -> Vec<Command> + Send + Sync,
{
    fn decide(&self, ctx: &Value, history: &[Event]) -> Vec<Command> {
        self(ctx, history)
    }
}

/// Name → decider lookup.
///
/// Engine-scoped, not process-global: construct one, register every decider
/// the deployment knows about, and hand it to the engine.
#[derive(Default)]
pub struct DeciderRegistry {
    deciders: HashMap<String, Arc<dyn Decider>>,
}

impl DeciderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, decider: impl Decider + 'static) {
        let name = name.into();
        debug!(decider = %name, "registered decider");
        self.deciders.insert(name, Arc::new(decider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Decider>> {
        self.deciders.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.deciders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deciders.is_empty()
    }
}
