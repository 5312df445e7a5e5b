//! In-memory store for per-module arguments, results and the active module.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered per-module arguments and results plus the current module index.
///
/// The store does no validation of its own; reachability is decided by the
/// [`Navigator`](super::navigator::Navigator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    arguments: Vec<Option<Value>>,
    results: Vec<Option<Value>>,
    current_index: usize,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    /// Fresh state with an empty argument object already allocated for module 0
    pub fn new() -> Self {
        Self {
            arguments: vec![Some(Value::Object(Default::default()))],
            results: Vec::new(),
            current_index: 0,
        }
    }

    pub fn argument(&self, module: usize) -> Option<&Value> {
        self.arguments.get(module).and_then(Option::as_ref)
    }

    pub fn set_argument(&mut self, module: usize, value: Value) {
        put(&mut self.arguments, module, value);
    }

    pub fn result(&self, module: usize) -> Option<&Value> {
        self.results.get(module).and_then(Option::as_ref)
    }

    pub fn set_result(&mut self, module: usize, value: Value) {
        put(&mut self.results, module, value);
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn set_current_index(&mut self, module: usize) {
        self.current_index = module;
    }

    /// Result of the module before `module`, if there is one
    pub fn previous_result(&self, module: usize) -> Option<&Value> {
        module.checked_sub(1).and_then(|prev| self.result(prev))
    }
}

fn put(slots: &mut Vec<Option<Value>>, index: usize, value: Value) {
    if slots.len() <= index {
        slots.resize(index + 1, None);
    }
    slots[index] = Some(value);
}
