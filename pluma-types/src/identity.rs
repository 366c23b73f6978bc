//! Host-supplied plugin metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{Error, PluginId};

/// The kind of plugin, which selects the post-import strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Panel,
    #[serde(rename = "datasource")]
    DataSource,
    App,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Panel => "panel",
            Self::DataSource => "datasource",
            Self::App => "app",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "panel" => Ok(Self::Panel),
            "datasource" => Ok(Self::DataSource),
            "app" => Ok(Self::App),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

/// How the module source reaches the evaluator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingStrategy {
    /// Source text is fetched, transformed and then evaluated.
    #[default]
    Fetch,
    /// Source is evaluated as delivered; asset rewriting is skipped.
    Script,
}

/// Where a plugin comes from. Core plugins ship with the host and are never sandboxed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginClass {
    Core,
    #[default]
    External,
}

/// An added component or link declared in plugin metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredExtension {
    pub title: String,
    #[serde(default)]
    pub targets: Vec<String>,
}

/// A component the plugin exposes for other plugins to consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredExposedComponent {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// Extension-point contributions the plugin declares up front.
///
/// When present, the loader registers only contributions matching a declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDeclarations {
    #[serde(default)]
    pub exposed_components: Vec<DeclaredExposedComponent>,
    #[serde(default)]
    pub added_components: Vec<DeclaredExtension>,
    #[serde(default)]
    pub added_links: Vec<DeclaredExtension>,
    #[serde(default)]
    pub added_functions: Vec<DeclaredExtension>,
}

impl ExtensionDeclarations {
    pub fn declares_exposed_component(&self, id: &str) -> bool {
        self.exposed_components.iter().any(|c| c.id == id)
    }

    pub fn declares_added_component(&self, title: &str) -> bool {
        self.added_components.iter().any(|c| c.title == title)
    }

    pub fn declares_added_link(&self, title: &str) -> bool {
        self.added_links.iter().any(|c| c.title == title)
    }

    pub fn declares_added_function(&self, title: &str) -> bool {
        self.added_functions.iter().any(|c| c.title == title)
    }
}

/// One installed plugin as described by the host. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginIdentity {
    pub id: PluginId,
    #[serde(rename = "type")]
    pub kind: PluginKind,
    /// Declared module path, possibly relative (`public/plugins/<id>/module`).
    #[serde(rename = "module")]
    pub module_path: String,
    pub version: String,
    /// Subresource-integrity hash such as `sha256-<base64>`.
    #[serde(default)]
    pub integrity: Option<String>,
    #[serde(default)]
    pub loading_strategy: LoadingStrategy,
    #[serde(default)]
    pub class: PluginClass,
    /// Locale code to translation resource path.
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
    #[serde(default)]
    pub extensions: Option<ExtensionDeclarations>,
}

impl PluginIdentity {
    pub fn new(
        id: PluginId,
        kind: PluginKind,
        module_path: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id,
            kind,
            module_path: module_path.into(),
            version: version.into(),
            integrity: None,
            loading_strategy: LoadingStrategy::default(),
            class: PluginClass::default(),
            translations: BTreeMap::new(),
            extensions: None,
        }
    }

    pub fn with_integrity(mut self, hash: impl Into<String>) -> Self {
        self.integrity = Some(hash.into());
        self
    }

    pub fn with_loading_strategy(mut self, strategy: LoadingStrategy) -> Self {
        self.loading_strategy = strategy;
        self
    }

    pub fn with_class(mut self, class: PluginClass) -> Self {
        self.class = class;
        self
    }

    pub fn with_translation(mut self, locale: impl Into<String>, path: impl Into<String>) -> Self {
        self.translations.insert(locale.into(), path.into());
        self
    }

    pub fn with_extensions(mut self, extensions: ExtensionDeclarations) -> Self {
        self.extensions = Some(extensions);
        self
    }

    /// Parses a host metadata record from JSON.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
