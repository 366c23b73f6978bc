//! Per-plugin sandbox sessions.
//!
//! A session is built lazily on the first sandboxed import of a plugin and
//! lives for the rest of the process. It owns the plugin's membrane (and with
//! it the distortion table and live-target set) and its endowed globals.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use pluma_types::PluginId;
use tracing::{debug, error, info};

use crate::distortion::DistortionTable;
use crate::dom::SANDBOX_ATTRIBUTE;
use crate::engine::ScriptEngine;
use crate::environment::HostEnvironment;
use crate::error::{EvaluationPhase, SandboxError};
use crate::membrane::Membrane;
use crate::module::ModuleSource;
use crate::realm::{Realm, panic_message};
use crate::value::{Function, FunctionRef, ObjectId, Value};

pub struct SandboxSession {
    plugin_id: PluginId,
    membrane: Arc<Membrane>,
    environment: Arc<HostEnvironment>,
    endowments: Arc<BTreeMap<String, Value>>,
    engine: Arc<dyn ScriptEngine>,
    evaluations: AtomicU64,
}

impl SandboxSession {
    pub fn new(
        plugin_id: PluginId,
        environment: Arc<HostEnvironment>,
        engine: Arc<dyn ScriptEngine>,
    ) -> Self {
        let membrane = Membrane::distorting(
            plugin_id.clone(),
            Arc::clone(environment.document()),
            DistortionTable::with_dom_defaults(),
        );
        let installed = environment.install_distortions(&membrane);
        for id in environment.live_objects() {
            membrane.mark_live(*id);
        }
        let endowments = Arc::new(environment.endowments(&plugin_id));
        info!(
            plugin_id = %plugin_id,
            static_distortions = installed,
            live_distortions = ?membrane.distortions().live_names(),
            "Sandbox session created"
        );
        Self {
            plugin_id,
            membrane,
            environment,
            endowments,
            engine,
            evaluations: AtomicU64::new(0),
        }
    }

    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    pub fn membrane(&self) -> &Arc<Membrane> {
        &self.membrane
    }

    /// Number of modules evaluated in this session.
    pub fn evaluation_count(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Evaluates a module inside the sandbox and returns its exports with
    /// every plugin-owned component tagged with the plugin id.
    ///
    /// Errors and panics raised by the engine or a factory are caught,
    /// logged with the plugin id and returned; they never unwind into the host.
    pub fn evaluate(&self, module: &ModuleSource) -> Result<Value, SandboxError> {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let realm = Realm::new(
            Arc::clone(&self.membrane),
            Arc::clone(&self.environment),
            Arc::clone(&self.endowments),
        );
        match run_module(self.engine.as_ref(), module, realm) {
            Ok(exports) => {
                let tagged = tag_components(exports, &self.membrane);
                debug!(plugin_id = %self.plugin_id, address = %module.address, "Sandboxed module evaluated");
                Ok(tagged)
            }
            Err(err) => {
                error!(plugin_id = %self.plugin_id, address = %module.address, "Sandboxed evaluation failed: {}", err);
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for SandboxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxSession")
            .field("plugin_id", &self.plugin_id)
            .field("evaluations", &self.evaluation_count())
            .finish()
    }
}

/// Evaluates a module for a trusted plugin: same realm and definer, but a
/// transparent membrane and no endowments.
pub fn evaluate_unsandboxed(
    plugin_id: &PluginId,
    environment: Arc<HostEnvironment>,
    engine: &dyn ScriptEngine,
    module: &ModuleSource,
) -> Result<Value, SandboxError> {
    let membrane = Membrane::transparent(plugin_id.clone());
    let realm = Realm::new(membrane, environment, Arc::new(BTreeMap::new()));
    run_module(engine, module, realm)
}

fn run_module(
    engine: &dyn ScriptEngine,
    module: &ModuleSource,
    mut realm: Realm,
) -> Result<Value, SandboxError> {
    let plugin_id = realm.plugin_id().to_string();
    match catch_unwind(AssertUnwindSafe(|| engine.evaluate(module, &mut realm))) {
        Ok(Ok(())) => realm.into_exports(),
        Ok(Err(err)) => Err(SandboxError::from_script(&plugin_id, EvaluationPhase::Evaluate, err)),
        Err(payload) => Err(SandboxError::Evaluation {
            plugin_id,
            phase: EvaluationPhase::Evaluate,
            message: panic_message(payload),
        }),
    }
}

/// Wraps each plugin-owned function reachable from `exports` so any element
/// it renders carries the plugin's sandbox attribute. Host values are left
/// alone and stand-ins are swapped back for their host targets.
fn tag_components(exports: Value, membrane: &Arc<Membrane>) -> Value {
    let mut visited = HashSet::new();
    tag_value(exports, membrane, &mut visited)
}

fn tag_value(value: Value, membrane: &Arc<Membrane>, visited: &mut HashSet<ObjectId>) -> Value {
    let Some(id) = value.identity() else {
        return value;
    };
    let restored = membrane.restore(value.clone());
    if !restored.same_value(&value) {
        return restored;
    }
    if membrane.is_host_value(id) || !visited.insert(id) {
        return value;
    }
    match value {
        Value::Function(f) => Value::Function(tagged_function(f, membrane)),
        Value::Object(obj) => {
            for (key, prop) in obj.entries() {
                let tagged = tag_value(prop.clone(), membrane, visited);
                if !tagged.same_value(&prop) {
                    obj.set(key, tagged);
                }
            }
            Value::Object(obj)
        }
        other => other,
    }
}

/// Host arguments reach `inner` the way they reach any other plugin code:
/// admitted and handed back, so a foreign element arrives as its mock.
fn tagged_function(inner: FunctionRef, membrane: &Arc<Membrane>) -> FunctionRef {
    let membrane = Arc::clone(membrane);
    let name = inner.name().to_string();
    let mediates_itself = membrane.is_mediating(inner.id());
    Function::new(name, move |args| {
        let rendered = if mediates_itself {
            inner.call(args)?
        } else {
            let admitted = membrane.admit_all(args)?;
            let handed: Vec<Value> = admitted.iter().map(|a| membrane.hand_back(a)).collect();
            inner.call(&handed)?
        };
        if let Value::Element(element) = &rendered {
            element.set_attribute(SANDBOX_ATTRIBUTE, membrane.plugin_id().as_str());
            membrane.adopt_element(element);
        }
        Ok(rendered)
    })
}

/// Lazily created, process-lifetime sandbox sessions keyed by plugin id.
pub struct SandboxRegistry {
    environment: Arc<HostEnvironment>,
    engine: Arc<dyn ScriptEngine>,
    sessions: Mutex<HashMap<PluginId, Arc<SandboxSession>>>,
}

impl SandboxRegistry {
    pub fn new(environment: Arc<HostEnvironment>, engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            environment,
            engine,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The session for `plugin_id`, created on first use.
    pub fn session(&self, plugin_id: &PluginId) -> Arc<SandboxSession> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(existing) = sessions.get(plugin_id) {
            return Arc::clone(existing);
        }
        let session = Arc::new(SandboxSession::new(
            plugin_id.clone(),
            Arc::clone(&self.environment),
            Arc::clone(&self.engine),
        ));
        sessions.insert(plugin_id.clone(), Arc::clone(&session));
        session
    }

    pub fn get(&self, plugin_id: &PluginId) -> Option<Arc<SandboxSession>> {
        self.sessions.lock().unwrap().get(plugin_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn environment(&self) -> &Arc<HostEnvironment> {
        &self.environment
    }

    pub fn engine(&self) -> &Arc<dyn ScriptEngine> {
        &self.engine
    }
}

impl std::fmt::Debug for SandboxRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}
