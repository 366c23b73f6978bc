//! Evaluation boundary between the loader and the sandbox.

use std::sync::Arc;

use pluma_sandbox::{
    HostEnvironment, ModuleSource, SandboxRegistry, ScriptEngine, Value, evaluate_unsandboxed,
};
use pluma_types::PluginId;
use tracing::error;

use crate::error::{LoadError, Result};

/// Runs transformed modules, inside a per-plugin sandbox session or directly.
pub struct ModuleEvaluator {
    sandboxes: SandboxRegistry,
}

impl ModuleEvaluator {
    pub fn new(environment: Arc<HostEnvironment>, engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            sandboxes: SandboxRegistry::new(environment, engine),
        }
    }

    pub fn sandboxes(&self) -> &SandboxRegistry {
        &self.sandboxes
    }

    pub fn evaluate(&self, plugin_id: &PluginId, module: &ModuleSource, sandboxed: bool) -> Result<Value> {
        if sandboxed {
            return self
                .sandboxes
                .session(plugin_id)
                .evaluate(module)
                .map_err(LoadError::from_sandbox);
        }

        evaluate_unsandboxed(
            plugin_id,
            Arc::clone(self.sandboxes.environment()),
            self.sandboxes.engine().as_ref(),
            module,
        )
        .map_err(|err| {
            error!(plugin_id = %plugin_id, address = %module.address, "Module evaluation failed: {}", err);
            LoadError::from_sandbox(err)
        })
    }
}

impl std::fmt::Debug for ModuleEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEvaluator")
            .field("sandboxes", &self.sandboxes)
            .finish()
    }
}
