//! Plugin module loader for pluma.
//!
//! Turns a host-supplied [`PluginIdentity`](pluma_types::PluginIdentity) into a
//! typed [`ResolvedPlugin`]:
//!
//! 1. the [`Resolver`] maps the module path to an address and cache-busts it
//! 2. the fetch layer retrieves it and verifies its integrity hash
//! 3. transforms isolate AMD `define` and rewrite CDN asset paths
//! 4. the module is evaluated, sandboxed or not, through `pluma-sandbox`
//! 5. a per-kind post-import strategy builds the plugin object
//!
//! [`PluginImporter`] coordinates the steps and guarantees that concurrent
//! imports of one plugin share a single load.

mod cache;
mod config;
mod error;
mod evaluator;
mod fetch;
mod importer;
pub mod integrity;
mod plugin;
mod registry;
mod resolver;
mod strategy;
pub mod transform;
mod translations;

pub use cache::{CacheEntry, PluginInfoCache};
pub use config::{LoaderConfig, SandboxConfig};
pub use error::{LoadError, Result};
pub use evaluator::ModuleEvaluator;
pub use fetch::{
    FetchedModule, HttpFetcher, ModuleArgs, ModuleFetcher, fetch_and_transform,
    is_script_content_type,
};
pub use importer::{LoadState, PluginImporter, PluginImporterBuilder};
pub use plugin::{AppPlugin, DataSourcePlugin, PanelPlugin, PluginMeta, ResolvedPlugin};
pub use registry::{Extension, ExtensionPoint, ExtensionRegistries, collect_extensions};
pub use resolver::{
    AssetKind, CACHE_BUST_PARAM, PLUGINS_PATH, Resolver, plugin_id_of, strip_cache_bust,
};
pub use strategy::apply as apply_strategy;
pub use translations::{Translations, load_translations};
