//! Module path resolution and cache busting.
//!
//! Addressing is fixed for compatibility with existing plugin bundles:
//! - local modules live under `<sub-path>/public/plugins/<id>/`
//! - CDN modules embed `<id>/<version>/` ahead of the same `public/plugins/` suffix
//! - the cache-bust query parameter is always `_cache`
//! - shared host modules use the `pluma-shared:` pseudo-scheme and never hit the network

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use std::time::{SystemTime, UNIX_EPOCH};

use pluma_sandbox::SHARED_DEPENDENCY_PREFIX;
use pluma_types::PluginId;
use regex::Regex;

use crate::cache::PluginInfoCache;
use crate::config::LoaderConfig;
use crate::error::{LoadError, Result};

pub const PLUGINS_PATH: &str = "public/plugins/";
pub const CACHE_BUST_PARAM: &str = "_cache";

static PLUGIN_ID_IN_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|/)public/plugins/([^/?#]+)/").unwrap());

static URL_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").unwrap());

/// Fallback cache-bust token for plugins with no registered version. Fixed
/// for the life of the process.
static PROCESS_START: LazyLock<String> = LazyLock::new(|| {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
        .to_string()
});

/// File types recognised for implicit suffixing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Script,
    Stylesheet,
    Json,
    Wasm,
}

impl AssetKind {
    /// Classifies an address by the extension of its path (query and
    /// fragment ignored).
    pub fn of(address: &str) -> Option<Self> {
        let (path, _) = split_suffix(address);
        let last_segment = path.rsplit('/').next().unwrap_or(path);
        let (_, ext) = last_segment.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "js" | "mjs" => Some(Self::Script),
            "css" => Some(Self::Stylesheet),
            "json" => Some(Self::Json),
            "wasm" => Some(Self::Wasm),
            _ => None,
        }
    }

    /// JSON and WASM resources are never cache-busted.
    pub fn is_cache_bustable(self) -> bool {
        matches!(self, Self::Script | Self::Stylesheet)
    }
}

/// Splits `address` into path and the `?query#fragment` remainder.
fn split_suffix(address: &str) -> (&str, &str) {
    match address.find(['?', '#']) {
        Some(idx) => address.split_at(idx),
        None => (address, ""),
    }
}

pub struct Resolver {
    app_sub_url: String,
    cdn_base_url: String,
    shared: BTreeSet<String>,
    cache: Arc<PluginInfoCache>,
}

impl Resolver {
    pub fn new(config: &LoaderConfig, cache: Arc<PluginInfoCache>) -> Self {
        // Resolved addresses must themselves be absolute for resolve to be idempotent.
        let sub = config.app_sub_url.trim().trim_end_matches('/');
        let app_sub_url = if sub.is_empty() || is_absolute(sub) {
            sub.to_string()
        } else {
            format!("/{sub}")
        };
        Self {
            app_sub_url,
            cdn_base_url: config.cdn_base_url.clone(),
            shared: BTreeSet::new(),
            cache,
        }
    }

    /// Registers a specifier that resolves to a shared host module.
    pub fn with_shared_dependency(mut self, name: impl Into<String>) -> Self {
        self.shared.insert(name.into());
        self
    }

    pub fn cache(&self) -> &Arc<PluginInfoCache> {
        &self.cache
    }

    /// Maps a declared module path to an address. Absolute inputs (a URL or a
    /// root-relative path) come back unchanged, so the mapping is idempotent.
    pub fn resolve(&self, specifier: &str) -> Result<String> {
        let specifier = specifier.trim();
        if specifier.is_empty() {
            return Err(LoadError::Resolution {
                path: specifier.to_string(),
                reason: "empty module path".to_string(),
            });
        }
        if self.shared.contains(specifier) {
            return Ok(format!("{SHARED_DEPENDENCY_PREFIX}{specifier}"));
        }
        if is_absolute(specifier) {
            return Ok(specifier.to_string());
        }
        let relative = specifier.trim_start_matches("./");
        if relative.starts_with("../") {
            return Err(LoadError::Resolution {
                path: specifier.to_string(),
                reason: "module path escapes the deployment root".to_string(),
            });
        }
        Ok(format!("{}/{}", self.app_sub_url, with_script_suffix(relative)))
    }

    pub fn is_cdn_hosted(&self, address: &str) -> bool {
        !self.cdn_base_url.is_empty() && address.starts_with(&self.cdn_base_url)
    }

    pub fn is_shared(&self, address: &str) -> bool {
        address.starts_with(SHARED_DEPENDENCY_PREFIX)
    }

    /// Appends the `_cache` token: the plugin's registered version, else the
    /// process-start timestamp. CDN, shared, JSON and WASM addresses and
    /// already-busted addresses come back unchanged.
    pub fn cache_bust(&self, address: &str) -> String {
        if self.is_cdn_hosted(address) || self.is_shared(address) || has_cache_bust(address) {
            return address.to_string();
        }
        if AssetKind::of(address).is_some_and(|kind| !kind.is_cache_bustable()) {
            return address.to_string();
        }
        let token = plugin_id_of(address)
            .and_then(|id| self.cache.token(&id))
            .unwrap_or_else(|| PROCESS_START.clone());

        let (path, rest) = split_suffix(address);
        let (query, fragment) = match rest.find('#') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let separator = if query.is_empty() { '?' } else { '&' };
        format!("{path}{query}{separator}{CACHE_BUST_PARAM}={token}{fragment}")
    }

    /// Base of a CDN address: everything before `/public/plugins/`.
    pub fn cdn_asset_base<'a>(&self, address: &'a str) -> Option<&'a str> {
        if !self.is_cdn_hosted(address) {
            return None;
        }
        let idx = address.find(&format!("/{PLUGINS_PATH}"))?;
        Some(&address[..idx])
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("app_sub_url", &self.app_sub_url)
            .field("cdn_base_url", &self.cdn_base_url)
            .field("shared", &self.shared)
            .finish()
    }
}

/// Extracts the plugin id from a local (`…/public/plugins/<id>/…`) or CDN
/// address. The last match in the path wins, so a deployment sub-path or CDN
/// prefix that happens to contain `plugins` is never mistaken for the id.
pub fn plugin_id_of(address: &str) -> Option<PluginId> {
    let path = address.split(['?', '#']).next().unwrap_or(address);
    let caps = PLUGIN_ID_IN_PATH.captures_iter(path).last()?;
    PluginId::parse(caps.get(1)?.as_str()).ok()
}

/// Removes the `_cache` query parameter, leaving the rest of the address intact.
pub fn strip_cache_bust(address: &str) -> String {
    let (path, rest) = split_suffix(address);
    let (query, fragment) = match rest.find('#') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    let Some(query) = query.strip_prefix('?') else {
        return address.to_string();
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let key = pair.split_once('=').map_or(*pair, |(k, _)| k);
            key != CACHE_BUST_PARAM
        })
        .collect();
    if kept.is_empty() {
        format!("{path}{fragment}")
    } else {
        format!("{path}?{}{fragment}", kept.join("&"))
    }
}

fn has_cache_bust(address: &str) -> bool {
    let (_, rest) = split_suffix(address);
    let query = rest.split('#').next().unwrap_or_default();
    query
        .trim_start_matches('?')
        .split('&')
        .any(|pair| pair.split_once('=').map_or(pair, |(k, _)| k) == CACHE_BUST_PARAM)
}

fn is_absolute(specifier: &str) -> bool {
    specifier.starts_with('/') || URL_SCHEME.is_match(specifier)
}

fn with_script_suffix(path: &str) -> String {
    if AssetKind::of(path).is_some() {
        return path.to_string();
    }
    let (path, rest) = split_suffix(path);
    format!("{path}.js{rest}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pluma_types::LoadingStrategy;

    fn resolver(sub: &str, cdn: &str) -> Resolver {
        let config = LoaderConfig {
            app_sub_url: sub.to_string(),
            cdn_base_url: cdn.to_string(),
            ..LoaderConfig::default()
        };
        Resolver::new(&config, Arc::new(PluginInfoCache::new()))
    }

    fn pid(s: &str) -> PluginId {
        PluginId::parse(s).unwrap()
    }

    #[test]
    fn relative_paths_get_sub_path_and_suffix() {
        let r = resolver("/grafana/", "");
        assert_eq!(
            r.resolve("public/plugins/acme/module").unwrap(),
            "/grafana/public/plugins/acme/module.js"
        );
        assert_eq!(
            r.resolve("./public/plugins/acme/styles.css").unwrap(),
            "/grafana/public/plugins/acme/styles.css"
        );
        assert_eq!(
            r.resolve("public/plugins/acme/module?x=1#top").unwrap(),
            "/grafana/public/plugins/acme/module.js?x=1#top"
        );
    }

    #[test]
    fn empty_sub_path_yields_root_relative() {
        let r = resolver("", "");
        assert_eq!(
            r.resolve("public/plugins/acme/module.js").unwrap(),
            "/public/plugins/acme/module.js"
        );
    }

    #[test]
    fn absolute_paths_are_unchanged() {
        let r = resolver("/sub", "");
        for input in [
            "/public/plugins/acme/module.js",
            "https://cdn.example.com/acme/1.0.0/public/plugins/acme/module.js",
            "pluma-shared:@pluma/runtime",
        ] {
            assert_eq!(r.resolve(input).unwrap(), input);
        }
    }

    #[test]
    fn shared_dependencies_route_to_prefix() {
        let r = resolver("", "").with_shared_dependency("@pluma/runtime");
        let address = r.resolve("@pluma/runtime").unwrap();
        assert_eq!(address, "pluma-shared:@pluma/runtime");
        assert!(r.is_shared(&address));
        assert_eq!(r.cache_bust(&address), address);
    }

    #[test]
    fn parent_escape_is_a_resolution_error() {
        let r = resolver("", "");
        assert!(matches!(
            r.resolve("../secrets/module"),
            Err(LoadError::Resolution { .. })
        ));
        assert!(r.resolve("  ").is_err());
    }

    #[test]
    fn cache_bust_uses_registered_version() {
        let r = resolver("", "");
        r.cache().register(&pid("acme"), "1.4.0", LoadingStrategy::Fetch);
        assert_eq!(
            r.cache_bust("/public/plugins/acme/module.js"),
            "/public/plugins/acme/module.js?_cache=1.4.0"
        );
        assert_eq!(
            r.cache_bust("/public/plugins/acme/module.js?a=b#frag"),
            "/public/plugins/acme/module.js?a=b&_cache=1.4.0#frag"
        );
    }

    #[test]
    fn cache_bust_falls_back_to_process_start() {
        let r = resolver("", "");
        let first = r.cache_bust("/public/plugins/unregistered/module.js");
        let second = r.cache_bust("/public/plugins/unregistered/module.js");
        assert_eq!(first, second);
        assert!(first.contains("?_cache="));
        // No plugin id at all still busts.
        assert!(r.cache_bust("/vendor/lib.js").contains("_cache="));
    }

    #[test]
    fn cache_bust_skips_cdn_json_wasm_and_busted() {
        let r = resolver("", "https://cdn.example.com");
        let cdn = "https://cdn.example.com/acme/1.0.0/public/plugins/acme/module.js";
        assert_eq!(r.cache_bust(cdn), cdn);
        assert_eq!(r.cache_bust("/public/plugins/acme/plugin.json"), "/public/plugins/acme/plugin.json");
        assert_eq!(r.cache_bust("/public/plugins/acme/lib.wasm"), "/public/plugins/acme/lib.wasm");
        let busted = "/public/plugins/acme/module.js?_cache=1";
        assert_eq!(r.cache_bust(busted), busted);
    }

    #[test]
    fn cdn_detection_requires_configured_base() {
        assert!(!resolver("", "").is_cdn_hosted("https://cdn.example.com/x.js"));
        let r = resolver("", "https://cdn.example.com");
        assert!(r.is_cdn_hosted("https://cdn.example.com/x.js"));
        assert!(!r.is_cdn_hosted("https://other.example.com/x.js"));
    }

    #[test]
    fn cdn_asset_base_is_prefix_before_public_plugins() {
        let r = resolver("", "https://cdn.example.com");
        assert_eq!(
            r.cdn_asset_base("https://cdn.example.com/acme/1.2.3/public/plugins/acme/module.js"),
            Some("https://cdn.example.com/acme/1.2.3")
        );
        assert_eq!(r.cdn_asset_base("/public/plugins/acme/module.js"), None);
    }

    #[test]
    fn plugin_id_from_local_and_cdn_paths() {
        assert_eq!(plugin_id_of("/public/plugins/acme/module.js"), Some(pid("acme")));
        assert_eq!(
            plugin_id_of("https://cdn.example.com/acme/1.2.3/public/plugins/acme/module.js"),
            Some(pid("acme"))
        );
        assert_eq!(plugin_id_of("/vendor/lib.js"), None);
    }

    #[test]
    fn plugin_id_ignores_plugins_in_sub_path() {
        assert_eq!(
            plugin_id_of("/myplugins/public/plugins/acme/module.js"),
            Some(pid("acme"))
        );
        assert_eq!(
            plugin_id_of("/plugins/public/plugins/acme/module.js?from=/public/plugins/other/"),
            Some(pid("acme"))
        );
        assert_eq!(
            plugin_id_of("https://cdn.example.com/public/plugins/mirror/acme/1.0.0/public/plugins/acme/module.js"),
            Some(pid("acme"))
        );
        assert_eq!(plugin_id_of("/myplugins/acme/module.js"), None);
    }

    #[test]
    fn cache_bust_under_plugins_sub_path_uses_registered_version() {
        let r = resolver("/myplugins", "");
        r.cache().register(&pid("acme"), "2.3.1", LoadingStrategy::Fetch);
        let address = r.resolve("public/plugins/acme/module").unwrap();
        assert_eq!(address, "/myplugins/public/plugins/acme/module.js");
        assert_eq!(r.cache_bust(&address), "/myplugins/public/plugins/acme/module.js?_cache=2.3.1");
    }

    #[test]
    fn strip_cache_bust_keeps_other_params() {
        assert_eq!(
            strip_cache_bust("/public/plugins/a/module.js?x=1&_cache=9#f"),
            "/public/plugins/a/module.js?x=1#f"
        );
        assert_eq!(
            strip_cache_bust("/public/plugins/a/module.js?_cache=9"),
            "/public/plugins/a/module.js"
        );
    }

    #[test]
    fn asset_kinds() {
        assert_eq!(AssetKind::of("a/b.JS"), Some(AssetKind::Script));
        assert_eq!(AssetKind::of("a/b.css?x"), Some(AssetKind::Stylesheet));
        assert_eq!(AssetKind::of("a.v2/module"), None);
        assert!(!AssetKind::Json.is_cache_bustable());
    }
}
