//! Error types for the sandbox.

use thiserror::Error;

use crate::value::ScriptError;

/// Which step of a sandboxed load raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationPhase {
    /// Running the module source in the realm.
    Evaluate,
    /// Invoking a `define()` factory.
    Factory,
}

impl std::fmt::Display for EvaluationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evaluate => f.write_str("evaluation"),
            Self::Factory => f.write_str("factory"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    #[error("sandbox {phase} failed for plugin '{plugin_id}': {message}")]
    Evaluation {
        plugin_id: String,
        phase: EvaluationPhase,
        message: String,
    },

    #[error("plugin '{plugin_id}' requires dependency '{dependency}' which is not exposed to sandboxed plugins")]
    MissingDependency {
        plugin_id: String,
        dependency: String,
    },

    #[error("capability denied: plugin '{plugin_id}' cannot {operation}")]
    CapabilityDenied {
        plugin_id: String,
        operation: String,
    },

    #[error("plugin '{plugin_id}' did not define a module")]
    NoModuleDefined { plugin_id: String },

    #[error("plugin '{plugin_id}' defined more than one anonymous module")]
    DuplicateDefinition { plugin_id: String },

    #[error("timer unavailable: {0}")]
    TimerUnavailable(String),
}

impl SandboxError {
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::Evaluation { plugin_id, .. }
            | Self::MissingDependency { plugin_id, .. }
            | Self::CapabilityDenied { plugin_id, .. }
            | Self::NoModuleDefined { plugin_id }
            | Self::DuplicateDefinition { plugin_id } => Some(plugin_id),
            Self::TimerUnavailable(_) => None,
        }
    }

    /// Converts a script error raised inside the realm. A sandbox error that
    /// travelled through plugin code keeps its original variant.
    pub(crate) fn from_script(plugin_id: &str, phase: EvaluationPhase, err: ScriptError) -> Self {
        match err.origin {
            Some(origin) => *origin,
            None => Self::Evaluation {
                plugin_id: plugin_id.to_string(),
                phase,
                message: err.unwrap_message(),
            },
        }
    }
}

impl From<SandboxError> for ScriptError {
    fn from(err: SandboxError) -> Self {
        let mut script = ScriptError::new(err.to_string());
        script.origin = Some(Box::new(err));
        script
    }
}
