//! Loader configuration, read from a `pluma.toml` file.
//!
//! ```toml
//! [loader]
//! app_sub_url = "/grafana"
//! cdn_base_url = "https://cdn.example.com/plugins"
//! integrity_check_enabled = true
//! locale = "de-DE"
//!
//! [sandbox]
//! enabled = true
//! excluded_plugins = ["legacy-panel"]
//! ```

use std::path::Path;

use pluma_types::{PluginClass, PluginIdentity};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::LoadError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Deployment sub-path prefixed to relative module paths.
    pub app_sub_url: String,
    /// Origin that root-relative addresses are fetched from.
    pub host_base_url: String,
    /// Base URL of CDN-hosted plugins; empty disables CDN handling.
    pub cdn_base_url: String,
    pub integrity_check_enabled: bool,
    pub locale: String,
    pub fallback_locale: String,
    #[serde(skip)]
    pub sandbox: SandboxConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            app_sub_url: String::new(),
            host_base_url: "http://localhost:3000".to_string(),
            cdn_base_url: String::new(),
            integrity_check_enabled: false,
            locale: "en-US".to_string(),
            fallback_locale: "en-US".to_string(),
            sandbox: SandboxConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub enabled: bool,
    /// Plugin ids that always run unsandboxed.
    pub excluded_plugins: Vec<String>,
}

impl LoaderConfig {
    /// Loads config from `path`. Falls back to defaults when the file is
    /// missing or unreadable, with a warning on parse errors.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("No loader config found at {:?}, using defaults", path);
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => {
                    info!("Loaded loader config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("{} in {:?}. Falling back to defaults.", e, path);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read loader config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, LoadError> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| LoadError::Config(e.to_string()))?;
        let mut config = file.loader;
        config.sandbox = file.sandbox;
        Ok(config)
    }

    /// Whether `identity` runs inside a sandbox session.
    pub fn should_sandbox(&self, identity: &PluginIdentity) -> bool {
        self.sandbox.enabled
            && identity.class != PluginClass::Core
            && !self
                .sandbox
                .excluded_plugins
                .iter()
                .any(|id| id == identity.id.as_str())
    }
}

/// Raw TOML structure matching the `pluma.toml` layout.
#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    loader: LoaderConfig,
    #[serde(default)]
    sandbox: SandboxConfig,
}
