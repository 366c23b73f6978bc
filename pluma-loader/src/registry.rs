//! Extension-point registries.
//!
//! A loaded plugin may contribute components, links and functions to other
//! plugins' extension points, and expose components for others to consume.
//! Contributions are read from the plugin export and stored per plugin so a
//! reload replaces them wholesale.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use pluma_sandbox::Value;
use pluma_types::{PluginId, PluginIdentity};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExtensionPoint {
    AddedComponent,
    AddedLink,
    AddedFunction,
    ExposedComponent,
}

impl ExtensionPoint {
    /// Property of the plugin export listing contributions of this kind.
    pub fn export_key(self) -> &'static str {
        match self {
            Self::AddedComponent => "addedComponents",
            Self::AddedLink => "addedLinks",
            Self::AddedFunction => "addedFunctions",
            Self::ExposedComponent => "exposedComponents",
        }
    }

    /// Property of a contribution holding its payload. Links are registered whole.
    fn payload_key(self) -> Option<&'static str> {
        match self {
            Self::AddedComponent | Self::ExposedComponent => Some("component"),
            Self::AddedFunction => Some("fn"),
            Self::AddedLink => None,
        }
    }

    const ALL: [ExtensionPoint; 4] = [
        Self::AddedComponent,
        Self::AddedLink,
        Self::AddedFunction,
        Self::ExposedComponent,
    ];
}

impl fmt::Display for ExtensionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.export_key())
    }
}

/// One registered contribution.
#[derive(Debug, Clone)]
pub struct Extension {
    pub point: ExtensionPoint,
    pub plugin_id: PluginId,
    /// Exposed component id, or `<plugin id>/<title>` for added contributions.
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    /// Extension-point ids this contribution targets. Empty for exposed components.
    pub targets: Vec<String>,
    pub value: Value,
}

/// Reads every extension contribution from a plugin export.
///
/// When the identity carries declarations, contributions that were not
/// declared are skipped with a warning.
pub fn collect_extensions(identity: &PluginIdentity, plugin: &Value) -> Vec<Extension> {
    let mut out = Vec::new();
    for point in ExtensionPoint::ALL {
        for item in plugin.get(point.export_key()).array_items() {
            let Some(extension) = read_extension(identity, point, &item) else {
                continue;
            };
            if !is_declared(identity, &extension) {
                warn!(
                    plugin_id = %identity.id,
                    point = %point,
                    title = %extension.title,
                    "Skipping undeclared extension contribution"
                );
                continue;
            }
            out.push(extension);
        }
    }
    out
}

fn read_extension(identity: &PluginIdentity, point: ExtensionPoint, item: &Value) -> Option<Extension> {
    let title = item.get("title").as_str().unwrap_or_default().to_string();
    let description = item.get("description").as_str().map(str::to_string);

    let (key, targets) = if point == ExtensionPoint::ExposedComponent {
        let id_value = item.get("id");
        let Some(id) = id_value.as_str().filter(|s| !s.is_empty()) else {
            warn!(plugin_id = %identity.id, "Exposed component without an id ignored");
            return None;
        };
        (id.to_string(), Vec::new())
    } else {
        if title.is_empty() {
            warn!(plugin_id = %identity.id, point = %point, "Extension contribution without a title ignored");
            return None;
        }
        (format!("{}/{}", identity.id, title), targets_of(&item.get("targets")))
    };

    let value = match point.payload_key() {
        Some(key) => item.get(key),
        None => item.clone(),
    };
    if value.is_nullish() {
        warn!(plugin_id = %identity.id, point = %point, key = %key, "Extension contribution without a payload ignored");
        return None;
    }

    Some(Extension {
        point,
        plugin_id: identity.id.clone(),
        key,
        title,
        description,
        targets,
        value,
    })
}

/// `targets` may be a single string or an array of strings.
fn targets_of(value: &Value) -> Vec<String> {
    match value.as_str() {
        Some(single) => vec![single.to_string()],
        None => value
            .array_items()
            .iter()
            .filter_map(|t| t.as_str().map(str::to_string))
            .collect(),
    }
}

fn is_declared(identity: &PluginIdentity, extension: &Extension) -> bool {
    let Some(declared) = &identity.extensions else {
        return true;
    };
    match extension.point {
        ExtensionPoint::AddedComponent => declared.declares_added_component(&extension.title),
        ExtensionPoint::AddedLink => declared.declares_added_link(&extension.title),
        ExtensionPoint::AddedFunction => declared.declares_added_function(&extension.title),
        ExtensionPoint::ExposedComponent => declared.declares_exposed_component(&extension.key),
    }
}

/// Registries for all extension points, keyed by contributing plugin.
#[derive(Default)]
pub struct ExtensionRegistries {
    by_plugin: RwLock<BTreeMap<PluginId, Vec<Extension>>>,
}

impl ExtensionRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    // ================================================================
    // Mutation
    // ================================================================

    /// Replaces everything `plugin_id` contributed. Returns the number kept.
    ///
    /// An exposed component id already owned by another plugin is skipped.
    pub fn replace(&self, plugin_id: &PluginId, extensions: Vec<Extension>) -> usize {
        let mut by_plugin = self.by_plugin.write().unwrap();
        let kept: Vec<Extension> = extensions
            .into_iter()
            .filter(|ext| {
                if ext.point != ExtensionPoint::ExposedComponent {
                    return true;
                }
                let owner = by_plugin.iter().find(|(id, exts)| {
                    *id != plugin_id
                        && exts
                            .iter()
                            .any(|e| e.point == ExtensionPoint::ExposedComponent && e.key == ext.key)
                });
                match owner {
                    Some((owner, _)) => {
                        warn!(
                            plugin_id = %plugin_id,
                            component_id = %ext.key,
                            owner = %owner,
                            "Exposed component id already registered by another plugin"
                        );
                        false
                    }
                    None => true,
                }
            })
            .collect();

        let count = kept.len();
        if kept.is_empty() {
            by_plugin.remove(plugin_id);
        } else {
            by_plugin.insert(plugin_id.clone(), kept);
        }
        debug!(plugin_id = %plugin_id, count, "Extension contributions registered");
        count
    }

    /// Drops everything `plugin_id` contributed.
    pub fn remove(&self, plugin_id: &PluginId) -> usize {
        self.by_plugin
            .write()
            .unwrap()
            .remove(plugin_id)
            .map_or(0, |exts| exts.len())
    }

    // ================================================================
    // Queries
    // ================================================================

    /// Contributions of `point` targeting `target`, in plugin id order.
    pub fn for_target(&self, point: ExtensionPoint, target: &str) -> Vec<Extension> {
        self.by_plugin
            .read()
            .unwrap()
            .values()
            .flatten()
            .filter(|e| e.point == point && e.targets.iter().any(|t| t == target))
            .cloned()
            .collect()
    }

    pub fn exposed_component(&self, id: &str) -> Option<Extension> {
        self.by_plugin
            .read()
            .unwrap()
            .values()
            .flatten()
            .find(|e| e.point == ExtensionPoint::ExposedComponent && e.key == id)
            .cloned()
    }

    pub fn for_plugin(&self, plugin_id: &PluginId) -> Vec<Extension> {
        self.by_plugin
            .read()
            .unwrap()
            .get(plugin_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of registered contributions of `point`.
    pub fn count(&self, point: ExtensionPoint) -> usize {
        self.by_plugin
            .read()
            .unwrap()
            .values()
            .flatten()
            .filter(|e| e.point == point)
            .count()
    }
}

impl fmt::Debug for ExtensionRegistries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistries")
            .field("plugins", &self.by_plugin.read().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pluma_types::{DeclaredExposedComponent, DeclaredExtension, ExtensionDeclarations, PluginKind};

    fn identity(id: &str) -> PluginIdentity {
        PluginIdentity::new(
            PluginId::parse(id).unwrap(),
            PluginKind::App,
            format!("public/plugins/{id}/module"),
            "1.0.0",
        )
    }

    fn component(name: &str) -> Value {
        Value::function(name, |_| Ok(Value::Null))
    }

    fn plugin_export() -> Value {
        Value::object([
            (
                "addedComponents",
                Value::array([Value::object([
                    ("title", Value::string("Status badge")),
                    ("targets", Value::string("pluma/dashboard/panel-menu")),
                    ("component", component("StatusBadge")),
                ])]),
            ),
            (
                "addedLinks",
                Value::array([Value::object([
                    ("title", Value::string("Open in Acme")),
                    ("description", Value::string("Jump to the Acme console")),
                    (
                        "targets",
                        Value::array([
                            Value::string("pluma/dashboard/panel-menu"),
                            Value::string("pluma/explore/toolbar"),
                        ]),
                    ),
                    ("path", Value::string("/a/acme-app/console")),
                ])]),
            ),
            (
                "exposedComponents",
                Value::array([Value::object([
                    ("id", Value::string("acme-app/query-builder/v1")),
                    ("title", Value::string("Query builder")),
                    ("component", component("QueryBuilder")),
                ])]),
            ),
        ])
    }

    #[test]
    fn collects_all_points() {
        let exts = collect_extensions(&identity("acme-app"), &plugin_export());
        assert_eq!(exts.len(), 3);

        let link = exts.iter().find(|e| e.point == ExtensionPoint::AddedLink).unwrap();
        assert_eq!(link.key, "acme-app/Open in Acme");
        assert_eq!(link.targets.len(), 2);
        assert_eq!(link.value.get("path").as_str(), Some("/a/acme-app/console"));
        assert_eq!(link.description.as_deref(), Some("Jump to the Acme console"));

        let added = exts.iter().find(|e| e.point == ExtensionPoint::AddedComponent).unwrap();
        assert_eq!(added.targets, vec!["pluma/dashboard/panel-menu".to_string()]);
    }

    #[test]
    fn undeclared_contributions_are_skipped() {
        let declared = identity("acme-app").with_extensions(ExtensionDeclarations {
            exposed_components: vec![DeclaredExposedComponent {
                id: "acme-app/query-builder/v1".into(),
                title: "Query builder".into(),
            }],
            added_links: vec![DeclaredExtension {
                title: "Open in Acme".into(),
                targets: vec!["pluma/dashboard/panel-menu".into()],
            }],
            ..Default::default()
        });
        let exts = collect_extensions(&declared, &plugin_export());
        assert_eq!(exts.len(), 2);
        assert!(exts.iter().all(|e| e.point != ExtensionPoint::AddedComponent));
    }

    #[test]
    fn entries_without_payload_or_title_are_ignored() {
        let export = Value::object([(
            "addedComponents",
            Value::array([
                Value::object([("title", Value::string("No component"))]),
                Value::object([("component", component("Untitled"))]),
            ]),
        )]);
        assert!(collect_extensions(&identity("acme-app"), &export).is_empty());
    }

    #[test]
    fn forged_lengths_do_not_blow_up_collection() {
        let link = Value::object([
            ("title", Value::string("Open in Acme")),
            (
                "targets",
                Value::object([
                    ("length", Value::Number(1e18)),
                    ("0", Value::string("pluma/explore/toolbar")),
                ]),
            ),
            ("path", Value::string("/a/acme-app/console")),
        ]);
        let export = Value::object([
            (
                "addedLinks",
                Value::object([("length", Value::Number(1e14)), ("0", link)]),
            ),
            ("addedComponents", Value::object([("length", Value::Number(1e18))])),
        ]);
        let exts = collect_extensions(&identity("acme-app"), &export);
        assert_eq!(exts.len(), 1);
        assert_eq!(exts[0].targets, vec!["pluma/explore/toolbar".to_string()]);
    }

    #[test]
    fn replace_swaps_plugin_contributions() {
        let registries = ExtensionRegistries::new();
        let id = PluginId::parse("acme-app").unwrap();
        let exts = collect_extensions(&identity("acme-app"), &plugin_export());
        assert_eq!(registries.replace(&id, exts), 3);
        assert_eq!(registries.for_target(ExtensionPoint::AddedLink, "pluma/explore/toolbar").len(), 1);
        assert!(registries.exposed_component("acme-app/query-builder/v1").is_some());

        assert_eq!(registries.replace(&id, Vec::new()), 0);
        assert!(registries.for_plugin(&id).is_empty());
        assert_eq!(registries.count(ExtensionPoint::AddedComponent), 0);
    }

    #[test]
    fn first_plugin_keeps_exposed_component_id() {
        let registries = ExtensionRegistries::new();
        let first = PluginId::parse("acme-app").unwrap();
        let second = PluginId::parse("rival-app").unwrap();
        registries.replace(&first, collect_extensions(&identity("acme-app"), &plugin_export()));
        let kept = registries.replace(&second, collect_extensions(&identity("rival-app"), &plugin_export()));

        // Added contributions are keyed per plugin; only the exposed id collides.
        assert_eq!(kept, 2);
        let owner = registries.exposed_component("acme-app/query-builder/v1").unwrap();
        assert_eq!(owner.plugin_id, first);
        assert_eq!(registries.count(ExtensionPoint::AddedComponent), 2);
        assert_eq!(registries.remove(&second), 2);
    }
}
