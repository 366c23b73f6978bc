//! Localized resource loading.

use std::collections::BTreeMap;

use pluma_types::PluginId;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::{LoadError, Result};
use crate::fetch::ModuleFetcher;
use crate::resolver::Resolver;

/// Translation resources loaded for one plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct Translations {
    pub locale: String,
    pub resources: JsonValue,
}

/// Loads the plugin's translation table: `locale` first, then
/// `fallback_locale`. Never fails; when neither loads a warning is logged
/// and `None` is returned.
pub async fn load_translations(
    fetcher: &dyn ModuleFetcher,
    resolver: &Resolver,
    plugin_id: &PluginId,
    table: &BTreeMap<String, String>,
    locale: &str,
    fallback_locale: &str,
) -> Option<Translations> {
    if table.is_empty() {
        return None;
    }
    let mut candidates = vec![locale];
    if fallback_locale != locale {
        candidates.push(fallback_locale);
    }

    for candidate in &candidates {
        let Some(path) = table.get(*candidate) else {
            debug!(plugin_id = %plugin_id, locale = %candidate, "No translation resource declared");
            continue;
        };
        match fetch_resource(fetcher, resolver, path).await {
            Ok(resources) => {
                debug!(plugin_id = %plugin_id, locale = %candidate, "Translations loaded");
                return Some(Translations {
                    locale: (*candidate).to_string(),
                    resources,
                });
            }
            Err(e) => {
                debug!(plugin_id = %plugin_id, locale = %candidate, "Translation load failed: {}", e);
            }
        }
    }

    warn!(
        plugin_id = %plugin_id,
        locales = ?candidates,
        "No translations could be loaded; continuing without them"
    );
    None
}

/// The address a translation resource is fetched (and cached) under.
pub(crate) fn resource_address(resolver: &Resolver, path: &str) -> Result<String> {
    Ok(resolver.cache_bust(&resolver.resolve(path)?))
}

async fn fetch_resource(fetcher: &dyn ModuleFetcher, resolver: &Resolver, path: &str) -> Result<JsonValue> {
    let address = resource_address(resolver, path)?;
    let fetched = fetcher.fetch(&address).await?;
    serde_json::from_slice(&fetched.bytes).map_err(|e| LoadError::Fetch {
        address,
        message: format!("invalid translation JSON: {e}"),
    })
}
