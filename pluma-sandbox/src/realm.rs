//! The isolated global scope a plugin module is evaluated in.
//!
//! A realm connects to the host through exactly two paths: the endowed
//! globals, and the membrane-mediated view of host globals. The plugin hands
//! its exports back by calling the isolated definer ([`Realm::define`]),
//! whose dependency names resolve against the allow-list only.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use pluma_types::PluginId;
use tracing::debug;

use crate::capability::Capability;
use crate::environment::HostEnvironment;
use crate::error::{EvaluationPhase, SandboxError};
use crate::membrane::Membrane;
use crate::value::{Object, ScriptError, Value};

/// Dependency names with built-in meaning in a `define` dependency list.
const EXPORTS_DEPENDENCY: &str = "exports";
const MODULE_DEPENDENCY: &str = "module";
const REQUIRE_DEPENDENCY: &str = "require";

struct Definition {
    name: Option<String>,
    exports: Value,
}

pub struct Realm {
    membrane: Arc<Membrane>,
    environment: Arc<HostEnvironment>,
    endowments: Arc<BTreeMap<String, Value>>,
    definitions: Vec<Definition>,
    exported: Option<Value>,
}

impl Realm {
    pub fn new(
        membrane: Arc<Membrane>,
        environment: Arc<HostEnvironment>,
        endowments: Arc<BTreeMap<String, Value>>,
    ) -> Self {
        Self {
            membrane,
            environment,
            endowments,
            definitions: Vec::new(),
            exported: None,
        }
    }

    pub fn plugin_id(&self) -> &PluginId {
        self.membrane.plugin_id()
    }

    pub fn membrane(&self) -> &Arc<Membrane> {
        &self.membrane
    }

    /// Reads a global: endowments first, then the host global through the
    /// membrane. Unknown names read as `undefined`.
    pub fn global(&self, name: &str) -> Result<Capability, SandboxError> {
        if let Some(endowed) = self.endowments.get(name) {
            return self.membrane.admit(endowed.clone());
        }
        match self.environment.global(name) {
            Some(value) => self.membrane.admit(value),
            None => Ok(Capability::undefined()),
        }
    }

    pub fn endowment_names(&self) -> impl Iterator<Item = &str> {
        self.endowments.keys().map(String::as_str)
    }

    /// Creates a plugin-side function. Arguments the host passes in are
    /// admitted through the membrane before `f` sees them.
    pub fn function(
        &self,
        name: &str,
        f: impl Fn(&[Capability]) -> Result<Value, ScriptError> + Send + Sync + 'static,
    ) -> Value {
        let membrane = Arc::clone(&self.membrane);
        let function = Value::function(name, move |args| {
            let admitted = membrane.admit_all(args)?;
            f(&admitted)
        });
        if let Some(id) = function.identity() {
            self.membrane.record_mediating(id);
        }
        function
    }

    /// The value plugin code may hold for `capability`; see [`Membrane::hand_back`].
    pub fn hand_back(&self, capability: &Capability) -> Value {
        self.membrane.hand_back(capability)
    }

    /// The isolated definer: resolves `dependencies` and invokes `factory`
    /// with their capabilities. An anonymous module may be defined once.
    pub fn define(
        &mut self,
        dependencies: &[&str],
        factory: impl FnOnce(Vec<Capability>) -> Result<Value, ScriptError>,
    ) -> Result<(), SandboxError> {
        self.define_module(None, dependencies, factory)
    }

    /// `define("name", [deps], factory)`.
    pub fn define_named(
        &mut self,
        name: &str,
        dependencies: &[&str],
        factory: impl FnOnce(Vec<Capability>) -> Result<Value, ScriptError>,
    ) -> Result<(), SandboxError> {
        self.define_module(Some(name.to_string()), dependencies, factory)
    }

    /// Sets the exports of a module that does not go through `define`.
    pub fn export(&mut self, exports: Value) {
        self.exported = Some(exports);
    }

    fn define_module(
        &mut self,
        name: Option<String>,
        dependencies: &[&str],
        factory: impl FnOnce(Vec<Capability>) -> Result<Value, ScriptError>,
    ) -> Result<(), SandboxError> {
        let plugin_id = self.plugin_id().to_string();
        if name.is_none() && self.definitions.iter().any(|d| d.name.is_none()) {
            return Err(SandboxError::DuplicateDefinition { plugin_id });
        }

        let exports = Object::new();
        let module = Value::object([("exports", Value::Object(Arc::clone(&exports)))]);

        let mut args = Vec::with_capacity(dependencies.len());
        for &dependency in dependencies {
            let capability = match dependency {
                EXPORTS_DEPENDENCY => self.membrane.wrap_owned(Value::Object(Arc::clone(&exports))),
                MODULE_DEPENDENCY => self.membrane.wrap_owned(module.clone()),
                REQUIRE_DEPENDENCY => self.membrane.wrap_owned(self.require_function()),
                other => {
                    let resolved = self.environment.dependencies().resolve(other).ok_or_else(|| {
                        SandboxError::MissingDependency {
                            plugin_id: plugin_id.clone(),
                            dependency: other.to_string(),
                        }
                    })?;
                    self.membrane.admit(resolved)?
                }
            };
            args.push(capability);
        }
        debug!(plugin_id = %plugin_id, module = ?name, dependencies = dependencies.len(), "Invoking module factory");

        let returned = match catch_unwind(AssertUnwindSafe(|| factory(args))) {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                return Err(SandboxError::from_script(&plugin_id, EvaluationPhase::Factory, err));
            }
            Err(payload) => {
                return Err(SandboxError::Evaluation {
                    plugin_id,
                    phase: EvaluationPhase::Factory,
                    message: panic_message(payload),
                });
            }
        };

        // A factory that returns nothing exports through `module.exports`.
        let exports = if returned.is_undefined() {
            module.get("exports")
        } else {
            returned
        };
        self.definitions.push(Definition { name, exports });
        Ok(())
    }

    /// `require(name)` inside a factory: same allow-list as the dependency array.
    fn require_function(&self) -> Value {
        let environment = Arc::clone(&self.environment);
        let plugin_id = self.plugin_id().to_string();
        Value::function(REQUIRE_DEPENDENCY, move |args| {
            let name = args.first().and_then(Value::as_str).unwrap_or_default();
            environment.dependencies().resolve(name).ok_or_else(|| {
                ScriptError::from(SandboxError::MissingDependency {
                    plugin_id: plugin_id.clone(),
                    dependency: name.to_string(),
                })
            })
        })
    }

    /// The module's exports: the anonymous definition, else an explicit
    /// export, else a lone named definition.
    pub(crate) fn into_exports(mut self) -> Result<Value, SandboxError> {
        if let Some(pos) = self.definitions.iter().position(|d| d.name.is_none()) {
            return Ok(self.definitions.swap_remove(pos).exports);
        }
        if let Some(exported) = self.exported.take() {
            return Ok(exported);
        }
        if self.definitions.len() == 1 {
            if let Some(only) = self.definitions.pop() {
                return Ok(only.exports);
            }
        }
        Err(SandboxError::NoModuleDefined {
            plugin_id: self.plugin_id().to_string(),
        })
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("plugin_id", self.plugin_id())
            .field("definitions", &self.definitions.len())
            .finish()
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
