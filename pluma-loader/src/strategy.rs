//! Post-import strategies: raw module exports to a typed plugin, per kind.

use pluma_sandbox::Value;
use pluma_types::{PluginIdentity, PluginKind};
use tracing::warn;

use crate::error::{LoadError, Result};
use crate::plugin::{AppPlugin, DataSourcePlugin, PanelPlugin, PluginMeta, ResolvedPlugin};

fn export(exports: &Value, name: &str) -> Option<Value> {
    let value = exports.get(name);
    (!value.is_nullish()).then_some(value)
}

/// Converts `exports` into a [`ResolvedPlugin`] for `identity.kind`.
///
/// Panels without a component degrade to a load-error placeholder and apps
/// without an export to an empty app. A data source with neither a plugin
/// wrapper nor a constructor export is rejected.
pub fn apply(identity: &PluginIdentity, meta: PluginMeta, exports: &Value) -> Result<ResolvedPlugin> {
    match identity.kind {
        PluginKind::Panel => Ok(ResolvedPlugin::Panel(panel(meta, exports))),
        PluginKind::DataSource => datasource(meta, exports).map(ResolvedPlugin::DataSource),
        PluginKind::App => Ok(ResolvedPlugin::App(app(meta, exports))),
    }
}

fn panel(meta: PluginMeta, exports: &Value) -> PanelPlugin {
    match export(exports, "plugin").or_else(|| export(exports, "PanelCtrl")) {
        Some(panel) => {
            meta.attach_to(&panel);
            PanelPlugin {
                meta,
                panel,
                load_error: None,
            }
        }
        None => {
            let message = format!("plugin '{}' does not export a panel component", meta.id);
            warn!(plugin_id = %meta.id, "Panel module has no component export; using load-error placeholder");
            PanelPlugin {
                meta,
                panel: Value::Undefined,
                load_error: Some(message),
            }
        }
    }
}

fn datasource(meta: PluginMeta, exports: &Value) -> Result<DataSourcePlugin> {
    if let Some(plugin) = export(exports, "plugin") {
        meta.attach_to(&plugin);
        let components = plugin.get("components");
        return Ok(DataSourcePlugin {
            query_editor: export(&components, "QueryEditor"),
            config_editor: export(&components, "ConfigEditor"),
            datasource: plugin,
            meta,
        });
    }

    if let Some(class) = export(exports, "Datasource") {
        meta.attach_to(&class);
        return Ok(DataSourcePlugin {
            query_editor: export(exports, "QueryCtrl"),
            config_editor: export(exports, "ConfigCtrl"),
            datasource: class,
            meta,
        });
    }

    Err(LoadError::MalformedExport {
        plugin_id: meta.id.to_string(),
        reason: "expected a 'plugin' or 'Datasource' export".to_string(),
    })
}

fn app(meta: PluginMeta, exports: &Value) -> AppPlugin {
    let root = export(exports, "plugin");
    match &root {
        Some(root) => meta.attach_to(root),
        None => warn!(plugin_id = %meta.id, "App module has no plugin export; using empty app"),
    }
    AppPlugin { meta, root }
}
