//! Property-based tests for address resolution and the plugin info cache.
//!
//! - Resolution is idempotent for any path and deployment sub-path
//! - Cache busting an address twice changes nothing
//! - The first registered version sticks until invalidated
//! - The CDN rewrite is idempotent and leaves text without local paths alone

use std::sync::Arc;

use pluma_loader::transform::rewrite_cdn_assets;
use pluma_loader::{LoaderConfig, PluginInfoCache, Resolver, strip_cache_bust};
use pluma_types::{LoadingStrategy, PluginId};
use proptest::prelude::*;

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn path_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("(\\.?/)?[a-z0-9_-]{1,8}(/[a-z0-9_.-]{1,10}){0,4}(\\?[a-z]=[0-9]{1,3})?")
        .unwrap()
}

fn sub_url_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("/".to_string()),
        Just("grafana".to_string()),
        Just("/apps/pluma/".to_string()),
        Just("https://host.example/sub".to_string()),
    ]
}

fn version_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}").unwrap()
}

fn resolver(sub_url: &str) -> Resolver {
    let config = LoaderConfig {
        app_sub_url: sub_url.to_string(),
        ..Default::default()
    };
    Resolver::new(&config, Arc::new(PluginInfoCache::new()))
}

// =============================================================================
// RESOLUTION PROPERTIES
// =============================================================================

proptest! {
    #[test]
    fn resolve_is_idempotent(path in path_strategy(), sub in sub_url_strategy()) {
        let resolver = resolver(&sub);
        if let Ok(once) = resolver.resolve(&path) {
            prop_assert_eq!(resolver.resolve(&once).unwrap(), once);
        }
    }

    #[test]
    fn cache_bust_is_idempotent(path in path_strategy()) {
        let resolver = resolver("");
        let address = resolver.resolve(&path).unwrap();
        let busted = resolver.cache_bust(&address);
        prop_assert_eq!(resolver.cache_bust(&busted), busted.clone());
        prop_assert_eq!(strip_cache_bust(&busted), address);
    }
}

// =============================================================================
// CACHE PROPERTIES
// =============================================================================

proptest! {
    #[test]
    fn first_registration_wins(first in version_strategy(), second in version_strategy()) {
        let cache = PluginInfoCache::new();
        let id = PluginId::parse("acme-panel").unwrap();
        prop_assert!(cache.register(&id, &first, LoadingStrategy::Fetch));
        prop_assert!(!cache.register(&id, &second, LoadingStrategy::Script));
        prop_assert_eq!(cache.get(&id).unwrap().version, first);

        prop_assert!(cache.invalidate(&id));
        prop_assert!(cache.register(&id, &second, LoadingStrategy::Fetch));
        prop_assert_eq!(cache.get(&id).unwrap().version, second);
    }
}

// =============================================================================
// CDN REWRITE PROPERTIES
// =============================================================================

proptest! {
    #[test]
    fn cdn_rewrite_is_idempotent(
        prefix in "[a-z =+(;'\"]{0,12}",
        asset in "[a-z]{1,8}\\.(html|svg|png)",
        slash in any::<bool>(),
    ) {
        let address = "http://cdn/foo/1.2.3/public/plugins/foo/module.js";
        let source = format!(
            "{prefix}'{}public/plugins/foo/{asset}'",
            if slash { "/" } else { "" }
        );
        let once = rewrite_cdn_assets(&source, address, "foo");
        let expected = format!("'http://cdn/foo/1.2.3/public/plugins/foo/{asset}'");
        prop_assert!(once.ends_with(&expected), "{} -> {}", source, once);
        prop_assert_eq!(rewrite_cdn_assets(&once, address, "foo"), once.clone());
    }

    #[test]
    fn cdn_rewrite_leaves_unrelated_text(source in "[a-zA-Z0-9 ;=(){}'\"\n]{0,80}") {
        let address = "http://cdn/foo/1.2.3/public/plugins/foo/module.js";
        prop_assert_eq!(rewrite_cdn_assets(&source, address, "foo"), source);
    }
}
