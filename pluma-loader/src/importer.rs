//! Import orchestrator.
//!
//! Owns the per-plugin load state machine:
//!
//! ```text
//! Unloaded ──import──▶ Loading ──ok──▶ Loaded
//!     ▲                   │              │
//!     └──────failed───────┘              │
//!                         ▲              │
//!                         └────reload────┘
//! ```
//!
//! Every caller importing the same plugin while it is `Loading` awaits the
//! same shared future, so a plugin is fetched and evaluated at most once per
//! load. The load itself runs on a spawned task and settles the state table
//! even if every caller has stopped waiting.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use pluma_sandbox::{HostEnvironment, ScriptEngine, Value};
use pluma_types::{PluginId, PluginIdentity};
use tracing::{debug, error, info, warn};

use crate::cache::PluginInfoCache;
use crate::config::LoaderConfig;
use crate::error::{LoadError, Result};
use crate::evaluator::ModuleEvaluator;
use crate::fetch::{self, HttpFetcher, ModuleArgs, ModuleFetcher};
use crate::plugin::{PluginMeta, ResolvedPlugin};
use crate::registry::{ExtensionRegistries, collect_extensions};
use crate::resolver::Resolver;
use crate::strategy;
use crate::translations::{load_translations, resource_address};

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<ResolvedPlugin>>>>;

/// Observable load state of one plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

enum Slot {
    Loading { generation: u64, load: SharedLoad },
    Loaded(Arc<ResolvedPlugin>),
}

struct Inner {
    config: LoaderConfig,
    resolver: Resolver,
    fetcher: Arc<dyn ModuleFetcher>,
    evaluator: ModuleEvaluator,
    registries: Arc<ExtensionRegistries>,
    slots: Mutex<HashMap<PluginId, Slot>>,
    generations: AtomicU64,
}

/// Loads plugins on behalf of one host application. Cheap to clone.
#[derive(Clone)]
pub struct PluginImporter {
    inner: Arc<Inner>,
}

impl PluginImporter {
    pub fn builder(config: LoaderConfig) -> PluginImporterBuilder {
        PluginImporterBuilder::new(config)
    }

    // ================================================================
    // Import / Reload
    // ================================================================

    /// Returns the loaded plugin, joining an in-flight load or starting one.
    pub async fn import_plugin(&self, identity: &PluginIdentity) -> Result<Arc<ResolvedPlugin>> {
        let load = {
            let mut slots = self.inner.slots.lock().unwrap();
            match slots.get(&identity.id) {
                Some(Slot::Loaded(plugin)) => return Ok(Arc::clone(plugin)),
                Some(Slot::Loading { load, .. }) => {
                    debug!(plugin_id = %identity.id, "Joining in-flight plugin load");
                    load.clone()
                }
                None => self.start_load(&mut slots, identity),
            }
        };
        load.await
    }

    /// Clears the plugin's resolved object, cache entry and cached module
    /// response, then imports it again. A load already in flight is joined
    /// instead of being restarted.
    pub async fn reload(&self, identity: &PluginIdentity) -> Result<Arc<ResolvedPlugin>> {
        let load = {
            let mut slots = self.inner.slots.lock().unwrap();
            if let Some(Slot::Loading { load, .. }) = slots.get(&identity.id) {
                debug!(plugin_id = %identity.id, "Reload requested during load; joining it");
                load.clone()
            } else {
                self.inner.invalidate(identity);
                slots.remove(&identity.id);
                self.start_load(&mut slots, identity)
            }
        };
        load.await
    }

    fn start_load(&self, slots: &mut HashMap<PluginId, Slot>, identity: &PluginIdentity) -> SharedLoad {
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let identity = identity.clone();
        let plugin_id = identity.id.clone();

        let task = tokio::spawn(async move {
            let result = match AssertUnwindSafe(inner.load(&identity)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(LoadError::Internal(format!(
                    "plugin load for '{}' panicked",
                    identity.id
                ))),
            };
            inner.settle(&identity.id, generation, &result);
            result
        });

        let load = async move {
            task.await
                .unwrap_or_else(|e| Err(LoadError::Internal(format!("plugin load task failed: {e}"))))
        }
        .boxed()
        .shared();

        slots.insert(
            plugin_id,
            Slot::Loading {
                generation,
                load: load.clone(),
            },
        );
        load
    }

    // ================================================================
    // Queries
    // ================================================================

    pub fn state(&self, plugin_id: &PluginId) -> LoadState {
        match self.inner.slots.lock().unwrap().get(plugin_id) {
            None => LoadState::Unloaded,
            Some(Slot::Loading { .. }) => LoadState::Loading,
            Some(Slot::Loaded(_)) => LoadState::Loaded,
        }
    }

    /// The loaded plugin, if its load has completed successfully.
    pub fn get(&self, plugin_id: &PluginId) -> Option<Arc<ResolvedPlugin>> {
        match self.inner.slots.lock().unwrap().get(plugin_id) {
            Some(Slot::Loaded(plugin)) => Some(Arc::clone(plugin)),
            _ => None,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    pub fn cache(&self) -> &Arc<PluginInfoCache> {
        self.inner.resolver.cache()
    }

    pub fn registries(&self) -> &Arc<ExtensionRegistries> {
        &self.inner.registries
    }

    pub fn evaluator(&self) -> &ModuleEvaluator {
        &self.inner.evaluator
    }
}

impl std::fmt::Debug for PluginImporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginImporter")
            .field("resolver", &self.inner.resolver)
            .field("plugins", &self.inner.slots.lock().unwrap().len())
            .finish()
    }
}

impl Inner {
    async fn load(&self, identity: &PluginIdentity) -> Result<Arc<ResolvedPlugin>> {
        let plugin_id = &identity.id;
        info!(plugin_id = %plugin_id, kind = %identity.kind, version = %identity.version, "Loading plugin");

        self.resolver
            .cache()
            .register(plugin_id, &identity.version, identity.loading_strategy);
        let args = ModuleArgs::new(identity, &self.resolver).inspect_err(|e| {
            error!(plugin_id = %plugin_id, "Plugin module path cannot be resolved: {}", e);
        })?;
        let sandboxed = self.config.should_sandbox(identity);

        let (exports, translations) = futures::join!(
            self.module_exports(&args, sandboxed),
            load_translations(
                self.fetcher.as_ref(),
                &self.resolver,
                plugin_id,
                &args.translations,
                &self.config.locale,
                &self.config.fallback_locale,
            )
        );
        let exports = exports.inspect_err(|e| {
            if e.is_retryable() {
                warn!(plugin_id = %plugin_id, "Plugin load failed, a later import may retry: {}", e);
            } else {
                error!(plugin_id = %plugin_id, "Plugin load failed: {}", e);
            }
        })?;

        let meta = PluginMeta {
            id: plugin_id.clone(),
            kind: identity.kind,
            version: identity.version.clone(),
            module_address: args.address.clone(),
            sandboxed,
            loading_strategy: identity.loading_strategy,
            translations,
        };
        let plugin = strategy::apply(identity, meta, &exports).inspect_err(|e| {
            error!(plugin_id = %plugin_id, "Plugin export rejected: {}", e);
        })?;

        let contributions = collect_extensions(identity, &contribution_source(&plugin));
        let registered = self.registries.replace(plugin_id, contributions);

        info!(
            plugin_id = %plugin_id,
            sandboxed,
            placeholder = plugin.is_placeholder(),
            extensions = registered,
            "Plugin loaded"
        );
        Ok(Arc::new(plugin))
    }

    /// Raw exports: taken from the allow-list for shared addresses, otherwise
    /// fetched, transformed and evaluated.
    async fn module_exports(&self, args: &ModuleArgs, sandboxed: bool) -> Result<Value> {
        if self.resolver.is_shared(&args.address) {
            return self
                .evaluator
                .sandboxes()
                .environment()
                .dependencies()
                .resolve(&args.address)
                .ok_or_else(|| LoadError::MissingDependency {
                    plugin_id: args.plugin_id.to_string(),
                    dependency: args.address.clone(),
                });
        }
        let module = fetch::fetch_and_transform(
            self.fetcher.as_ref(),
            &self.resolver,
            args,
            self.config.integrity_check_enabled,
        )
        .await?;
        self.evaluator.evaluate(&args.plugin_id, &module, sandboxed)
    }

    /// Promotes a successful load or returns the plugin to `Unloaded`.
    /// A slot replaced by a newer generation is left alone.
    fn settle(&self, plugin_id: &PluginId, generation: u64, result: &Result<Arc<ResolvedPlugin>>) {
        let mut slots = self.slots.lock().unwrap();
        let current = matches!(
            slots.get(plugin_id),
            Some(Slot::Loading { generation: g, .. }) if *g == generation
        );
        if !current {
            debug!(plugin_id = %plugin_id, generation, "Stale load settled; ignoring");
            return;
        }
        match result {
            Ok(plugin) => {
                slots.insert(plugin_id.clone(), Slot::Loaded(Arc::clone(plugin)));
            }
            Err(_) => {
                slots.remove(plugin_id);
            }
        }
    }

    /// Best-effort cleanup before a reload. Resolution failures are logged
    /// and do not stop the cache entry from being dropped.
    fn invalidate(&self, identity: &PluginIdentity) {
        match self.resolver.resolve(&identity.module_path) {
            Ok(address) => {
                let fetched = self.resolver.cache_bust(&address);
                self.fetcher.evict(&fetched);
            }
            Err(e) => {
                warn!(plugin_id = %identity.id, "Cannot resolve module during reload, skipping fetch cache: {}", e);
            }
        }
        for (locale, path) in &identity.translations {
            match resource_address(&self.resolver, path) {
                Ok(address) => {
                    self.fetcher.evict(&address);
                }
                Err(e) => {
                    warn!(plugin_id = %identity.id, locale = %locale, "Cannot resolve translations during reload: {}", e);
                }
            }
        }
        self.resolver.cache().invalidate(&identity.id);
        self.registries.remove(&identity.id);
    }
}

/// The value whose `addedComponents`, `addedLinks`, ... describe the
/// plugin's extension contributions.
fn contribution_source(plugin: &ResolvedPlugin) -> Value {
    match plugin {
        ResolvedPlugin::Panel(p) => p.panel.clone(),
        ResolvedPlugin::DataSource(p) => p.datasource.clone(),
        ResolvedPlugin::App(p) => p.root.clone().unwrap_or_default(),
    }
}

/// Builds a [`PluginImporter`]. A script engine is required; everything
/// else has a default.
pub struct PluginImporterBuilder {
    config: LoaderConfig,
    fetcher: Option<Arc<dyn ModuleFetcher>>,
    engine: Option<Arc<dyn ScriptEngine>>,
    environment: Option<Arc<HostEnvironment>>,
    registries: Option<Arc<ExtensionRegistries>>,
    cache: Option<Arc<PluginInfoCache>>,
    shared_dependencies: Vec<String>,
}

impl PluginImporterBuilder {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            fetcher: None,
            engine: None,
            environment: None,
            registries: None,
            cache: None,
            shared_dependencies: Vec::new(),
        }
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ModuleFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn ScriptEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn environment(mut self, environment: Arc<HostEnvironment>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn registries(mut self, registries: Arc<ExtensionRegistries>) -> Self {
        self.registries = Some(registries);
        self
    }

    pub fn cache(mut self, cache: Arc<PluginInfoCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Routes module paths naming `name` to the host's shared module.
    pub fn shared_dependency(mut self, name: impl Into<String>) -> Self {
        self.shared_dependencies.push(name.into());
        self
    }

    pub fn build(self) -> Result<PluginImporter> {
        let engine = self
            .engine
            .ok_or_else(|| LoadError::Config("a script engine is required".to_string()))?;
        let environment = self.environment.unwrap_or_default();
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(HttpFetcher::new(self.config.host_base_url.clone())));
        let cache = self.cache.unwrap_or_default();

        let mut resolver = Resolver::new(&self.config, cache);
        for name in self.shared_dependencies {
            resolver = resolver.with_shared_dependency(name);
        }

        Ok(PluginImporter {
            inner: Arc::new(Inner {
                evaluator: ModuleEvaluator::new(environment, engine),
                registries: self.registries.unwrap_or_default(),
                resolver,
                fetcher,
                config: self.config,
                slots: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pluma_sandbox::{ModuleSource, Realm, ScriptError};
    use pluma_types::PluginKind;

    fn engine() -> Arc<dyn ScriptEngine> {
        Arc::new(|_: &ModuleSource, _: &mut Realm| -> std::result::Result<(), ScriptError> { Ok(()) })
    }

    #[test]
    fn build_requires_engine() {
        let err = PluginImporter::builder(LoaderConfig::default()).build().unwrap_err();
        assert!(matches!(err, LoadError::Config(_)));
    }

    #[tokio::test]
    async fn shared_module_path_skips_network() {
        let environment = HostEnvironment::default().with_dependency(
            "@pluma/runtime-panel",
            Value::object([("plugin", Value::object([("render", Value::Null)]))]),
        );
        let importer = PluginImporter::builder(LoaderConfig::default())
            .engine(engine())
            .environment(Arc::new(environment))
            .fetcher(Arc::new(HttpFetcher::new("http://127.0.0.1:9")))
            .shared_dependency("@pluma/runtime-panel")
            .build()
            .unwrap();

        let identity = PluginIdentity::new(
            PluginId::parse("runtime-panel").unwrap(),
            PluginKind::Panel,
            "@pluma/runtime-panel",
            "1.0.0",
        );
        let plugin = importer.import_plugin(&identity).await.unwrap();
        assert!(!plugin.is_placeholder());
        assert_eq!(plugin.meta().module_address, "pluma-shared:@pluma/runtime-panel");
        assert_eq!(importer.state(&identity.id), LoadState::Loaded);
    }
}
