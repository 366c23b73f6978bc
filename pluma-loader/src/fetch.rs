//! Fetch layer and the fetch/transform pipeline.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use pluma_sandbox::{ModuleFormat, ModuleSource};
use pluma_types::{LoadingStrategy, PluginId, PluginIdentity};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};

use crate::error::{LoadError, Result};
use crate::integrity;
use crate::resolver::Resolver;
use crate::transform;

/// A fetched resource.
#[derive(Debug, Clone)]
pub struct FetchedModule {
    pub address: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Retrieves module and translation resources by address.
#[async_trait]
pub trait ModuleFetcher: Send + Sync {
    async fn fetch(&self, address: &str) -> Result<FetchedModule>;

    /// Drops any cached response for `address`. Returns whether one existed.
    fn evict(&self, _address: &str) -> bool {
        false
    }
}

/// HTTP fetcher with an in-memory response cache.
///
/// No timeout is applied; callers needing bounded latency wrap the import.
pub struct HttpFetcher {
    client: Client,
    host_base_url: String,
    cache: RwLock<HashMap<String, FetchedModule>>,
    requests: AtomicU64,
}

impl HttpFetcher {
    pub fn new(host_base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .user_agent(concat!("pluma-loader/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self::with_client(client, host_base_url)
    }

    pub fn with_client(client: Client, host_base_url: impl Into<String>) -> Self {
        Self {
            client,
            host_base_url: host_base_url.into().trim_end_matches('/').to_string(),
            cache: RwLock::new(HashMap::new()),
            requests: AtomicU64::new(0),
        }
    }

    /// Number of network requests issued (cache hits excluded).
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    fn url_for(&self, address: &str) -> String {
        if address.starts_with('/') && !address.starts_with("//") {
            format!("{}{}", self.host_base_url, address)
        } else {
            address.to_string()
        }
    }
}

#[async_trait]
impl ModuleFetcher for HttpFetcher {
    async fn fetch(&self, address: &str) -> Result<FetchedModule> {
        if let Some(hit) = self.cache.read().unwrap().get(address) {
            debug!(address = %address, "Fetch cache hit");
            return Ok(hit.clone());
        }

        let url = self.url_for(address);
        self.requests.fetch_add(1, Ordering::Relaxed);
        debug!(address = %address, url = %url, "Fetching module resource");

        let response = self.client.get(&url).send().await.map_err(|e| LoadError::Fetch {
            address: address.to_string(),
            message: format!("request failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Fetch {
                address: address.to_string(),
                message: format!("HTTP {status}"),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| LoadError::Fetch {
            address: address.to_string(),
            message: format!("read body failed: {e}"),
        })?;

        let fetched = FetchedModule {
            address: address.to_string(),
            content_type,
            bytes: bytes.to_vec(),
        };
        self.cache
            .write()
            .unwrap()
            .insert(address.to_string(), fetched.clone());
        Ok(fetched)
    }

    fn evict(&self, address: &str) -> bool {
        let evicted = self.cache.write().unwrap().remove(address).is_some();
        if evicted {
            debug!(address = %address, "Fetch cache entry evicted");
        }
        evicted
    }
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("host_base_url", &self.host_base_url)
            .field("cached", &self.cache.read().unwrap().len())
            .finish()
    }
}

/// Everything the pipeline needs to load one plugin module.
#[derive(Debug, Clone)]
pub struct ModuleArgs {
    pub plugin_id: PluginId,
    /// Resolved address, without a cache-bust token.
    pub address: String,
    /// Address actually requested.
    pub fetch_address: String,
    pub version: String,
    pub loading_strategy: LoadingStrategy,
    pub integrity: Option<String>,
    /// Locale code to translation resource path.
    pub translations: BTreeMap<String, String>,
}

impl ModuleArgs {
    pub fn new(identity: &PluginIdentity, resolver: &Resolver) -> Result<Self> {
        let address = resolver.resolve(&identity.module_path)?;
        let fetch_address = resolver.cache_bust(&address);
        Ok(Self {
            plugin_id: identity.id.clone(),
            address,
            fetch_address,
            version: identity.version.clone(),
            loading_strategy: identity.loading_strategy,
            integrity: identity.integrity.clone().filter(|h| !h.trim().is_empty()),
            translations: identity.translations.clone(),
        })
    }
}

/// Whether a `Content-Type` names executable script. A missing header is accepted.
pub fn is_script_content_type(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return true;
    };
    let mime = ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    mime.ends_with("/javascript")
        || mime.ends_with("/ecmascript")
        || mime.ends_with("/x-javascript")
        || mime.ends_with("/x-ecmascript")
}

/// Fetches a module and prepares it for evaluation:
/// 1. fetch `args.fetch_address`
/// 2. reject non-script content types
/// 3. verify integrity (before anything touches the text)
/// 4. bind AMD `define` to the isolated definer
/// 5. rewrite local asset paths when CDN-hosted
pub async fn fetch_and_transform(
    fetcher: &dyn ModuleFetcher,
    resolver: &Resolver,
    args: &ModuleArgs,
    integrity_check_enabled: bool,
) -> Result<ModuleSource> {
    let fetched = fetcher.fetch(&args.fetch_address).await?;

    if !is_script_content_type(fetched.content_type.as_deref()) {
        return Err(LoadError::ContentType {
            address: args.fetch_address.clone(),
            content_type: fetched.content_type.unwrap_or_default(),
        });
    }

    if integrity_check_enabled {
        if let Some(hash) = &args.integrity {
            integrity::verify(&args.fetch_address, &fetched.bytes, hash)?;
        }
    }

    let text = String::from_utf8(fetched.bytes).map_err(|_| LoadError::Fetch {
        address: args.fetch_address.clone(),
        message: "response body is not valid UTF-8".to_string(),
    })?;

    let format = ModuleFormat::detect(&text);
    let mut text = transform::isolate_amd_define(&text, &format);

    let cdn_hosted = resolver.is_cdn_hosted(&args.address);
    if let Some(asset_base) = resolver.cdn_asset_base(&args.address) {
        debug!(
            plugin_id = %args.plugin_id,
            asset_base = %asset_base,
            strategy = ?args.loading_strategy,
            "Rewriting CDN asset paths"
        );
        text = transform::rewrite_cdn_assets(&text, &args.address, args.plugin_id.as_str());
    }

    info!(
        plugin_id = %args.plugin_id,
        address = %args.address,
        format = ?format,
        cdn_hosted,
        "Module fetched and transformed"
    );
    Ok(ModuleSource::new(args.address.clone(), text, format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_classification() {
        assert!(is_script_content_type(None));
        assert!(is_script_content_type(Some("application/javascript; charset=utf-8")));
        assert!(is_script_content_type(Some("text/javascript")));
        assert!(is_script_content_type(Some("application/x-javascript")));
        assert!(is_script_content_type(Some("Text/ECMAScript")));
        assert!(!is_script_content_type(Some("text/html")));
        assert!(!is_script_content_type(Some("application/json")));
    }

    #[test]
    fn url_for_joins_root_relative_addresses() {
        let fetcher = HttpFetcher::new("http://localhost:3000/");
        assert_eq!(
            fetcher.url_for("/public/plugins/a/module.js"),
            "http://localhost:3000/public/plugins/a/module.js"
        );
        assert_eq!(fetcher.url_for("https://cdn/x.js"), "https://cdn/x.js");
    }
}
