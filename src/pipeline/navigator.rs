//! Module navigation: reachability checks and the load/ready handshake.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::sync::Arc;

use super::state::PipelineState;
use super::PipelineError;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ViewHostError(pub String);

/// Something that can make the presentation layer display a module view.
pub trait ViewHost: Send + Sync {
    fn load_view(&self, module: usize, file_name: &str) -> Result<(), ViewHostError>;
}

/// Per-transition state: a navigation is `Loading` until its view signals ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "module", rename_all = "lowercase")]
pub enum NavigationPhase {
    Idle,
    Loading(usize),
    Ready(usize),
}

/// What a freshly loaded view receives: its previously recorded argument
/// and the result of the module before it.
///
/// On the wire this is the two-element array `[argument, previous_result]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModulePayload {
    pub argument: Option<Value>,
    pub previous_result: Option<Value>,
}

impl Serialize for ModulePayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.argument, &self.previous_result).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ModulePayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (argument, previous_result) = <(Option<Value>, Option<Value>)>::deserialize(deserializer)?;
        Ok(Self {
            argument,
            previous_result,
        })
    }
}

pub struct Navigator {
    phase: NavigationPhase,
    module_count: Option<usize>,
    view_prefix: String,
    view_extension: String,
    view_host: Arc<dyn ViewHost>,
}

impl Navigator {
    pub fn new(view_host: Arc<dyn ViewHost>) -> Self {
        Self {
            phase: NavigationPhase::Idle,
            module_count: None,
            view_prefix: "module".to_string(),
            view_extension: "html".to_string(),
            view_host,
        }
    }

    pub fn with_module_count(mut self, count: Option<usize>) -> Self {
        self.module_count = count;
        self
    }

    pub fn with_view_naming(mut self, prefix: &str, extension: &str) -> Self {
        self.view_prefix = prefix.to_string();
        self.view_extension = extension.to_string();
        self
    }

    pub fn phase(&self) -> NavigationPhase {
        self.phase
    }

    /// A module is reachable when its argument slot is already populated or
    /// the module before it has produced a result.
    pub fn is_reachable(&self, state: &PipelineState, target: usize) -> bool {
        if let Some(count) = self.module_count {
            if target >= count {
                return false;
            }
        }
        state.argument(target).is_some() || state.previous_result(target).is_some()
    }

    /// Start a transition to `target`.
    ///
    /// On success the view host has been told to load the view and the
    /// navigator waits in `Loading` for [`Navigator::view_ready`].
    pub fn request_go_to(
        &mut self,
        state: &mut PipelineState,
        target: i64,
    ) -> Result<(), PipelineError> {
        let module = usize::try_from(target)
            .ok()
            .filter(|&module| self.is_reachable(state, module))
            .ok_or(PipelineError::NotReachable { target })?;

        let file_name = format!("{}{}.{}", self.view_prefix, module, self.view_extension);
        self.view_host.load_view(module, &file_name)?;

        state.set_current_index(module);
        if let NavigationPhase::Loading(pending) = self.phase {
            tracing::debug!("Navigation to module {} superseded by {}", pending, module);
        }
        self.phase = NavigationPhase::Loading(module);
        tracing::info!("Loading module {} ({})", module, file_name);
        Ok(())
    }

    /// Handle the view-ready signal. Yields the payload once per navigation.
    pub fn view_ready(&mut self, state: &PipelineState) -> Option<ModulePayload> {
        match self.phase {
            NavigationPhase::Loading(module) => {
                self.phase = NavigationPhase::Ready(module);
                tracing::debug!("Module {} ready", module);
                Some(ModulePayload {
                    argument: state.argument(module).cloned(),
                    previous_result: state.previous_result(module).cloned(),
                })
            }
            phase => {
                tracing::trace!("Ignoring ready signal in phase {:?}", phase);
                None
            }
        }
    }
}
