//! Shared test helpers for loader tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pluma_loader::{LoaderConfig, PluginImporter};
use pluma_sandbox::{HostEnvironment, ModuleSource, Realm, ScriptEngine, ScriptError, Value};
use pluma_types::{PluginId, PluginIdentity, PluginKind};

pub type Script = Arc<dyn Fn(&ModuleSource, &mut Realm) -> Result<(), ScriptError> + Send + Sync>;

/// Stands in for a JavaScript engine. Each plugin id may be given a script;
/// plugins without one get a default that calls `define` with the module's
/// declared dependencies and returns a panel export.
#[derive(Default)]
pub struct FakeEngine {
    scripts: Mutex<HashMap<String, Script>>,
    evaluations: AtomicUsize,
    sources: Mutex<Vec<ModuleSource>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(
        &self,
        plugin_id: &str,
        script: impl Fn(&ModuleSource, &mut Realm) -> Result<(), ScriptError> + Send + Sync + 'static,
    ) {
        self.scripts
            .lock()
            .unwrap()
            .insert(plugin_id.to_string(), Arc::new(script));
    }

    /// Script that defines the module with `exports` as the factory result.
    pub fn exports(&self, plugin_id: &str, exports: impl Fn() -> Value + Send + Sync + 'static) {
        self.script(plugin_id, move |module, realm| {
            let deps: Vec<&str> = module.format.dependencies().iter().map(String::as_str).collect();
            let value = exports();
            realm.define(&deps, move |_| Ok(value))?;
            Ok(())
        });
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    /// Every module text the engine was asked to run, in order.
    pub fn sources(&self) -> Vec<ModuleSource> {
        self.sources.lock().unwrap().clone()
    }

    pub fn as_engine(self: &Arc<Self>) -> Arc<dyn ScriptEngine> {
        let this = Arc::clone(self);
        Arc::new(move |module: &ModuleSource, realm: &mut Realm| this.run(module, realm))
    }

    fn run(&self, module: &ModuleSource, realm: &mut Realm) -> Result<(), ScriptError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().unwrap().push(module.clone());
        let script = self.scripts.lock().unwrap().get(realm.plugin_id().as_str()).cloned();
        match script {
            Some(script) => script(module, realm),
            None => {
                let deps: Vec<&str> = module.format.dependencies().iter().map(String::as_str).collect();
                realm.define(&deps, |_| Ok(panel_exports()))?;
                Ok(())
            }
        }
    }
}

pub fn panel_exports() -> Value {
    Value::object([(
        "plugin",
        Value::object([("name", Value::string("panel component"))]),
    )])
}

pub fn pid(s: &str) -> PluginId {
    PluginId::parse(s).unwrap()
}

pub fn identity(id: &str, kind: PluginKind) -> PluginIdentity {
    PluginIdentity::new(pid(id), kind, format!("public/plugins/{id}/module"), "1.0.0")
}

pub fn module_path(id: &str) -> String {
    format!("/public/plugins/{id}/module.js")
}

pub const AMD_MODULE: &str = "define([], function () { return {}; });";

pub fn config_for(host: &str) -> LoaderConfig {
    LoaderConfig {
        host_base_url: host.to_string(),
        ..Default::default()
    }
}

pub fn importer(config: LoaderConfig, engine: &Arc<FakeEngine>) -> PluginImporter {
    importer_with(config, engine, HostEnvironment::default())
}

pub fn importer_with(
    config: LoaderConfig,
    engine: &Arc<FakeEngine>,
    environment: HostEnvironment,
) -> PluginImporter {
    PluginImporter::builder(config)
        .engine(engine.as_engine())
        .environment(Arc::new(environment))
        .build()
        .unwrap()
}

/// Routes `tracing` output to the test harness writer.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
