//! Error types for plugin loading.

use pluma_sandbox::SandboxError;
use thiserror::Error;

/// A failed load. `Clone` so one failure can be handed to every caller
/// sharing the in-flight load.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("cannot resolve module path '{path}': {reason}")]
    Resolution { path: String, reason: String },

    #[error("fetch failed for {address}: {message}")]
    Fetch { address: String, message: String },

    #[error("unexpected content type '{content_type}' for {address}")]
    ContentType {
        address: String,
        content_type: String,
    },

    #[error("integrity check failed for {address}: expected {expected}")]
    Integrity { address: String, expected: String },

    #[error("plugin '{plugin_id}' has a malformed export: {reason}")]
    MalformedExport { plugin_id: String, reason: String },

    #[error("sandboxed load failed: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("plugin '{plugin_id}' requires missing dependency '{dependency}'")]
    MissingDependency {
        plugin_id: String,
        dependency: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal loader error: {0}")]
    Internal(String),
}

impl LoadError {
    /// Whether a later import may succeed without anything changing on the
    /// plugin's side. Malformed, integrity and resolution failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::ContentType { .. } | Self::Sandbox(_)
        )
    }

    /// Maps a sandbox error, lifting missing dependencies into their own variant.
    pub fn from_sandbox(err: SandboxError) -> Self {
        match err {
            SandboxError::MissingDependency {
                plugin_id,
                dependency,
            } => Self::MissingDependency {
                plugin_id,
                dependency,
            },
            other => Self::Sandbox(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let fetch = LoadError::Fetch {
            address: "public/plugins/a/module.js".into(),
            message: "connection reset".into(),
        };
        assert!(fetch.is_retryable());
        let integrity = LoadError::Integrity {
            address: "x".into(),
            expected: "sha256-abc".into(),
        };
        assert!(!integrity.is_retryable());
        let malformed = LoadError::MalformedExport {
            plugin_id: "ds".into(),
            reason: "no plugin export".into(),
        };
        assert!(!malformed.is_retryable());
    }

    #[test]
    fn missing_dependency_is_lifted() {
        let err = LoadError::from_sandbox(SandboxError::MissingDependency {
            plugin_id: "acme".into(),
            dependency: "left-pad".into(),
        });
        assert!(matches!(err, LoadError::MissingDependency { .. }));
        assert!(err.to_string().contains("left-pad"));
        assert!(!err.is_retryable());
    }
}
