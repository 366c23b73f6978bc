//! Resolved plugin objects handed back to the host.

use pluma_sandbox::Value;
use pluma_types::{LoadingStrategy, PluginId, PluginKind};

use crate::translations::Translations;

/// Host metadata attached to every resolved plugin.
#[derive(Debug, Clone)]
pub struct PluginMeta {
    pub id: PluginId,
    pub kind: PluginKind,
    pub version: String,
    /// Resolved module address (without cache-bust token).
    pub module_address: String,
    pub sandboxed: bool,
    pub loading_strategy: LoadingStrategy,
    pub translations: Option<Translations>,
}

impl PluginMeta {
    /// Script-side view of the metadata, attached to the plugin export as `meta`.
    pub fn to_value(&self) -> Value {
        Value::object([
            ("id", Value::string(self.id.as_str())),
            ("type", Value::string(self.kind.as_str())),
            ("version", Value::string(self.version.as_str())),
            ("module", Value::string(self.module_address.as_str())),
            ("sandboxed", Value::Bool(self.sandboxed)),
            (
                "loadingStrategy",
                Value::string(match self.loading_strategy {
                    LoadingStrategy::Fetch => "fetch",
                    LoadingStrategy::Script => "script",
                }),
            ),
            (
                "locale",
                self.translations
                    .as_ref()
                    .map_or(Value::Undefined, |t| Value::string(t.locale.as_str())),
            ),
        ])
    }

    /// Sets `meta` on `plugin` when it is an object; other values are left as is.
    pub(crate) fn attach_to(&self, plugin: &Value) {
        if let Some(obj) = plugin.as_object() {
            obj.set("meta", self.to_value());
        }
    }
}

#[derive(Debug, Clone)]
pub struct PanelPlugin {
    pub meta: PluginMeta,
    /// The panel component. `Undefined` for a load-error placeholder.
    pub panel: Value,
    /// Set when the module lacked a panel export.
    pub load_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DataSourcePlugin {
    pub meta: PluginMeta,
    pub datasource: Value,
    pub query_editor: Option<Value>,
    pub config_editor: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct AppPlugin {
    pub meta: PluginMeta,
    /// Root page component; `None` for an extension-only app.
    pub root: Option<Value>,
}

/// A loaded plugin, one variant per kind.
#[derive(Debug, Clone)]
pub enum ResolvedPlugin {
    Panel(PanelPlugin),
    DataSource(DataSourcePlugin),
    App(AppPlugin),
}

impl ResolvedPlugin {
    pub fn meta(&self) -> &PluginMeta {
        match self {
            Self::Panel(p) => &p.meta,
            Self::DataSource(p) => &p.meta,
            Self::App(p) => &p.meta,
        }
    }

    pub fn id(&self) -> &PluginId {
        &self.meta().id
    }

    pub fn kind(&self) -> PluginKind {
        self.meta().kind
    }

    /// True for a panel load-error placeholder or an app with no export.
    pub fn is_placeholder(&self) -> bool {
        match self {
            Self::Panel(p) => p.load_error.is_some(),
            Self::DataSource(_) => false,
            Self::App(a) => a.root.is_none(),
        }
    }

    pub fn as_panel(&self) -> Option<&PanelPlugin> {
        match self {
            Self::Panel(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_datasource(&self) -> Option<&DataSourcePlugin> {
        match self {
            Self::DataSource(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_app(&self) -> Option<&AppPlugin> {
        match self {
            Self::App(p) => Some(p),
            _ => None,
        }
    }
}
