//! Host environment shared by every sandbox session.
//!
//! Describes what the host exposes (globals, document, allow-listed modules)
//! and which of those values are sensitive. Each session derives its static
//! distortions and endowed globals from here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use pluma_types::PluginId;
use tracing::{debug, error, info, warn};

use crate::allowlist::DependencyAllowList;
use crate::distortion::Distortion;
use crate::dom::{Document, DocumentRef, Element, ElementRef};
use crate::error::SandboxError;
use crate::membrane::Membrane;
use crate::value::{ObjectId, ScriptError, Value};

/// Global names a plugin receives instead of the host's own.
pub const ENDOWED_GLOBALS: &[&str] = &["location", "setTimeout"];

/// Blocking dialogs replaced by no-op substitutes.
const DIALOG_GLOBALS: &[&str] = &["alert", "confirm", "prompt"];

const CONSOLE_METHODS: &[&str] = &["log", "info", "debug", "warn", "error"];

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Snapshot of the host location handed to plugins in place of the real one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationInfo {
    pub href: String,
    pub origin: String,
    pub pathname: String,
    pub search: String,
    pub hash: String,
}

impl Default for LocationInfo {
    fn default() -> Self {
        Self {
            href: "http://localhost:3000/".into(),
            origin: "http://localhost:3000".into(),
            pathname: "/".into(),
            search: String::new(),
            hash: String::new(),
        }
    }
}

pub struct HostEnvironment {
    document: DocumentRef,
    globals: BTreeMap<String, Value>,
    dependencies: DependencyAllowList,
    location: LocationInfo,
    shared_singletons: Vec<String>,
    protected_elements: Vec<ElementRef>,
    denied: Vec<(Value, String)>,
    live_objects: Vec<ObjectId>,
}

impl HostEnvironment {
    /// An environment whose only global is `document`.
    pub fn new(document: DocumentRef) -> Self {
        let mut globals = BTreeMap::new();
        globals.insert("document".to_string(), Value::Document(Arc::clone(&document)));
        Self {
            document,
            globals,
            dependencies: DependencyAllowList::new(),
            location: LocationInfo::default(),
            shared_singletons: Vec::new(),
            protected_elements: Vec::new(),
            denied: Vec::new(),
            live_objects: Vec::new(),
        }
    }

    pub fn with_global(mut self, name: impl Into<String>, value: Value) -> Self {
        self.globals.insert(name.into(), value);
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>, exports: Value) -> Self {
        self.dependencies.insert(name, exports);
        self
    }

    pub fn with_dependencies(mut self, dependencies: DependencyAllowList) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_location(mut self, location: LocationInfo) -> Self {
        self.location = location;
        self
    }

    /// Names an optional host singleton (a global) that plugins get a handle
    /// to when present.
    pub fn with_shared_singleton(mut self, name: impl Into<String>) -> Self {
        self.shared_singletons.push(name.into());
        self
    }

    /// Marks an embedding-surface element: plugins always see a mock of it,
    /// even if it later ends up inside their own fragment.
    pub fn protect_element(mut self, element: ElementRef) -> Self {
        self.protected_elements.push(element);
        self
    }

    /// Any crossing of `value` into a sandbox fails with a capability error.
    pub fn deny(mut self, value: Value, operation: impl Into<String>) -> Self {
        self.denied.push((value, operation.into()));
        self
    }

    /// Marks a host object whose in-place mutation must be visible on both sides.
    pub fn with_live_object(mut self, value: &Value) -> Self {
        if let Some(id) = value.identity() {
            self.live_objects.push(id);
        }
        self
    }

    pub fn document(&self) -> &DocumentRef {
        &self.document
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    pub fn dependencies(&self) -> &DependencyAllowList {
        &self.dependencies
    }

    pub fn location(&self) -> &LocationInfo {
        &self.location
    }

    pub(crate) fn live_objects(&self) -> &[ObjectId] {
        &self.live_objects
    }

    /// Installs this environment's static distortions for one plugin. Runs
    /// once per session, before any plugin code.
    pub(crate) fn install_distortions(&self, membrane: &Membrane) -> usize {
        let plugin_id = membrane.plugin_id();
        let table = membrane.distortions();
        let mut installed = 0;

        for name in DIALOG_GLOBALS {
            if let Some(original) = self.globals.get(*name) {
                let substitute = blocked_dialog(plugin_id, name);
                if table.insert(original, format!("window.{name}"), Distortion::Replace(substitute)) {
                    installed += 1;
                }
            }
        }

        if let Some(console) = self.globals.get("console") {
            if table.insert(console, "console", Distortion::Replace(plugin_console(plugin_id))) {
                installed += 1;
            }
        }

        for element in &self.protected_elements {
            let mock = Element::new(element.tag_name());
            membrane.record_mock(&mock);
            let original = Value::Element(Arc::clone(element));
            if table.insert(&original, "embedding surface", Distortion::Replace(Value::Element(mock))) {
                installed += 1;
            }
        }

        for (value, operation) in &self.denied {
            let deny = Distortion::Deny {
                operation: operation.clone(),
            };
            if table.insert(value, operation.clone(), deny) {
                installed += 1;
            }
        }

        debug!(plugin_id = %plugin_id, installed, "Static distortions installed");
        installed
    }

    /// The endowed globals for one plugin: a navigation-inert location, a
    /// deferred timer and whatever shared singletons the host currently has.
    pub(crate) fn endowments(&self, plugin_id: &PluginId) -> BTreeMap<String, Value> {
        let mut endowed = BTreeMap::new();
        endowed.insert("location".to_string(), self.location_endowment(plugin_id));
        endowed.insert("setTimeout".to_string(), set_timeout(plugin_id));

        for name in &self.shared_singletons {
            match self.globals.get(name) {
                Some(value) => {
                    endowed.insert(name.clone(), value.clone());
                }
                None => {
                    debug!(plugin_id = %plugin_id, singleton = %name, "Shared singleton not present; skipped");
                }
            }
        }
        endowed
    }

    fn location_endowment(&self, plugin_id: &PluginId) -> Value {
        let loc = &self.location;
        let mut entries = vec![
            ("href", Value::from(loc.href.as_str())),
            ("origin", Value::from(loc.origin.as_str())),
            ("pathname", Value::from(loc.pathname.as_str())),
            ("search", Value::from(loc.search.as_str())),
            ("hash", Value::from(loc.hash.as_str())),
        ];
        for method in ["assign", "replace", "reload"] {
            let plugin_id = plugin_id.clone();
            entries.push((
                method,
                Value::function(method, move |args| {
                    let target = args.first().map(Value::display_string).unwrap_or_default();
                    warn!(plugin_id = %plugin_id, method, target = %target, "Sandboxed navigation blocked");
                    Ok(Value::Undefined)
                }),
            ));
        }
        Value::object(entries)
    }
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self::new(Document::new())
    }
}

impl std::fmt::Debug for HostEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEnvironment")
            .field("globals", &self.globals.keys().collect::<Vec<_>>())
            .field("dependencies", &self.dependencies.len())
            .field("protected_elements", &self.protected_elements.len())
            .finish()
    }
}

fn blocked_dialog(plugin_id: &PluginId, name: &'static str) -> Value {
    let plugin_id = plugin_id.clone();
    Value::function(name, move |args| {
        let message = args.first().map(Value::display_string).unwrap_or_default();
        warn!(plugin_id = %plugin_id, dialog = name, message = %message, "Blocking dialog suppressed in sandbox");
        Ok(match name {
            "confirm" => Value::Bool(false),
            "prompt" => Value::Null,
            _ => Value::Undefined,
        })
    })
}

fn plugin_console(plugin_id: &PluginId) -> Value {
    let methods = CONSOLE_METHODS.iter().map(|&method| {
        let plugin_id = plugin_id.clone();
        let f = Value::function(method, move |args| {
            let line = args
                .iter()
                .map(Value::display_string)
                .collect::<Vec<_>>()
                .join(" ");
            match method {
                "error" => error!(plugin_id = %plugin_id, "{}", line),
                "warn" => warn!(plugin_id = %plugin_id, "{}", line),
                "debug" => debug!(plugin_id = %plugin_id, "{}", line),
                _ => info!(plugin_id = %plugin_id, "{}", line),
            }
            Ok(Value::Undefined)
        });
        (method, f)
    });
    Value::object(methods)
}

/// `setTimeout(callback, delay)`: runs the callback on the current tokio
/// runtime after `delay` milliseconds and returns a timer id.
fn set_timeout(plugin_id: &PluginId) -> Value {
    let plugin_id = plugin_id.clone();
    Value::function("setTimeout", move |args| {
        let Some(callback) = args.first().and_then(Value::as_function).cloned() else {
            return Err(ScriptError::new("setTimeout: callback is not a function"));
        };
        let delay = args
            .get(1)
            .and_then(Value::as_number)
            .filter(|ms| ms.is_finite() && *ms > 0.0)
            .unwrap_or(0.0);
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            ScriptError::from(SandboxError::TimerUnavailable(format!(
                "no async runtime for plugin '{plugin_id}': {e}"
            )))
        })?;
        let timer_id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let plugin_id = plugin_id.clone();
        handle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            if let Err(e) = callback.call(&[]) {
                error!(plugin_id = %plugin_id, timer_id, "Sandboxed timer callback failed: {}", e);
            }
        });
        Ok(Value::Number(timer_id as f64))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distortion::DistortionTable;

    fn pid() -> PluginId {
        PluginId::parse("acme-panel").unwrap()
    }

    #[test]
    fn dialogs_and_console_get_static_entries() {
        let env = HostEnvironment::default()
            .with_global("alert", Value::function("alert", |_| Ok(Value::Undefined)))
            .with_global("confirm", Value::function("confirm", |_| Ok(Value::Bool(true))))
            .with_global("console", Value::object([("log", Value::Null)]));
        let membrane = Membrane::distorting(pid(), Arc::clone(env.document()), DistortionTable::new());
        assert_eq!(env.install_distortions(&membrane), 3);

        let confirm = membrane.admit(env.global("confirm").unwrap()).unwrap();
        assert_eq!(confirm.call(&[Value::from("sure?")]).unwrap().as_bool(), Some(false));

        let console = membrane.admit(env.global("console").unwrap()).unwrap();
        let log = console.get("log").unwrap();
        assert!(log.call(&[Value::from("hello")]).unwrap().is_undefined());
    }

    #[test]
    fn protected_element_is_always_a_mock() {
        let doc = Document::new();
        let surface = doc.create_element("iframe");
        doc.body().append_child(&surface);
        let env = HostEnvironment::new(doc.clone()).protect_element(Arc::clone(&surface));
        let membrane = Membrane::distorting(pid(), doc, DistortionTable::with_dom_defaults());
        env.install_distortions(&membrane);

        let cap = membrane.admit(Value::Element(surface.clone())).unwrap();
        let el = cap.as_element().unwrap();
        assert!(el.is_mock());
        assert_eq!(el.tag_name(), "iframe");
    }

    #[test]
    fn location_endowment_blocks_navigation() {
        let env = HostEnvironment::default().with_location(LocationInfo {
            href: "https://dash.example.com/d/abc?x=1".into(),
            origin: "https://dash.example.com".into(),
            pathname: "/d/abc".into(),
            search: "?x=1".into(),
            hash: String::new(),
        });
        let endowed = env.endowments(&pid());
        let location = endowed.get("location").unwrap();
        assert_eq!(location.get("pathname").as_str(), Some("/d/abc"));
        let assign = location.get("assign");
        let result = assign.as_function().unwrap().call(&[Value::from("https://evil.example")]);
        assert!(result.unwrap().is_undefined());
    }

    #[test]
    fn missing_shared_singleton_is_skipped() {
        let env = HostEnvironment::default()
            .with_global("pluginEvents", Value::object([("emit", Value::Null)]))
            .with_shared_singleton("pluginEvents")
            .with_shared_singleton("notInstalled");
        let endowed = env.endowments(&pid());
        assert!(endowed.contains_key("pluginEvents"));
        assert!(!endowed.contains_key("notInstalled"));
    }

    #[test]
    fn set_timeout_without_runtime_fails() {
        let env = HostEnvironment::default();
        let endowed = env.endowments(&pid());
        let timer = endowed.get("setTimeout").unwrap().as_function().unwrap().clone();
        let cb = Value::function("cb", |_| Ok(Value::Undefined));
        let err = timer.call(&[cb, Value::Number(5.0)]).unwrap_err();
        assert!(err.to_string().contains("timer unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn set_timeout_runs_callback_on_runtime() {
        let env = HostEnvironment::default();
        let endowed = env.endowments(&pid());
        let timer = endowed.get("setTimeout").unwrap().as_function().unwrap().clone();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let tx = std::sync::Mutex::new(Some(tx));
        let cb = Value::function("cb", move |_| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
            Ok(Value::Undefined)
        });
        let id = timer.call(&[cb, Value::Number(250.0)]).unwrap();
        assert!(id.as_number().is_some());
        rx.await.unwrap();
    }
}
