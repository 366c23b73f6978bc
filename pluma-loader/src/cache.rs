//! Plugin info cache: cache-bust bookkeeping per plugin id.

use std::collections::HashMap;
use std::sync::RwLock;

use pluma_types::{LoadingStrategy, PluginId};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub version: String,
    pub loading_strategy: LoadingStrategy,
}

/// First-write-wins table of `{version, loading_strategy}` keyed by plugin id.
///
/// Entries only change through [`invalidate`](Self::invalidate) followed by
/// a new registration, which keeps cache-busted addresses stable for the session.
#[derive(Debug, Default)]
pub struct PluginInfoCache {
    entries: RwLock<HashMap<PluginId, CacheEntry>>,
    /// Derived cache-bust tokens.
    tokens: RwLock<HashMap<PluginId, String>>,
}

impl PluginInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `version` for `id`. Returns `false` and leaves the stored entry
    /// untouched if `id` is already registered.
    pub fn register(&self, id: &PluginId, version: &str, loading_strategy: LoadingStrategy) -> bool {
        let mut entries = self.entries.write().unwrap();
        if let Some(existing) = entries.get(id) {
            if existing.version != version {
                debug!(
                    plugin_id = %id,
                    stored = %existing.version,
                    ignored = %version,
                    "Plugin already registered; keeping first version"
                );
            }
            return false;
        }
        entries.insert(
            id.clone(),
            CacheEntry {
                version: version.to_string(),
                loading_strategy,
            },
        );
        true
    }

    pub fn get(&self, id: &PluginId) -> Option<CacheEntry> {
        self.entries.read().unwrap().get(id).cloned()
    }

    pub fn contains(&self, id: &PluginId) -> bool {
        self.entries.read().unwrap().contains_key(id)
    }

    /// Cache-bust token for `id`, or `None` if the plugin is not registered.
    pub fn token(&self, id: &PluginId) -> Option<String> {
        if let Some(token) = self.tokens.read().unwrap().get(id) {
            return Some(token.clone());
        }
        let entry = self.get(id)?;
        let mut tokens = self.tokens.write().unwrap();
        Some(tokens.entry(id.clone()).or_insert(entry.version).clone())
    }

    /// Drops the entry and its derived token. Returns whether an entry existed.
    pub fn invalidate(&self, id: &PluginId) -> bool {
        let removed = self.entries.write().unwrap().remove(id).is_some();
        self.tokens.write().unwrap().remove(id);
        if removed {
            info!(plugin_id = %id, "Plugin info cache entry invalidated");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
