use pluma_types::*;

fn id(s: &str) -> PluginId {
    PluginId::parse(s).unwrap()
}

// ── Builder ───────────────────────────────────────────────────────

#[test]
fn new_identity_has_defaults() {
    let ident = PluginIdentity::new(id("clock"), PluginKind::Panel, "public/plugins/clock/module", "1.0.0");
    assert_eq!(ident.loading_strategy, LoadingStrategy::Fetch);
    assert_eq!(ident.class, PluginClass::External);
    assert!(ident.integrity.is_none());
    assert!(ident.translations.is_empty());
    assert!(ident.extensions.is_none());
}

#[test]
fn builder_methods_set_fields() {
    let ident = PluginIdentity::new(id("clock"), PluginKind::Panel, "m", "1.0.0")
        .with_integrity("sha256-abc")
        .with_loading_strategy(LoadingStrategy::Script)
        .with_class(PluginClass::Core)
        .with_translation("en-US", "public/plugins/clock/locales/en-US/clock.json");
    assert_eq!(ident.integrity.as_deref(), Some("sha256-abc"));
    assert_eq!(ident.loading_strategy, LoadingStrategy::Script);
    assert_eq!(ident.class, PluginClass::Core);
    assert_eq!(ident.translations.len(), 1);
}

// ── Kind ──────────────────────────────────────────────────────────

#[test]
fn kind_round_trips_through_str() {
    for kind in [PluginKind::Panel, PluginKind::DataSource, PluginKind::App] {
        assert_eq!(kind.as_str().parse::<PluginKind>().unwrap(), kind);
    }
    assert!("renderer".parse::<PluginKind>().is_err());
}

// ── Host metadata JSON ────────────────────────────────────────────

#[test]
fn identity_from_host_json() {
    let json = r#"{
        "id": "acme-datasource",
        "type": "datasource",
        "module": "public/plugins/acme-datasource/module",
        "version": "2.3.1",
        "integrity": "sha256-AAAA",
        "loadingStrategy": "script",
        "translations": { "en-US": "public/plugins/acme-datasource/locales/en-US/acme.json" },
        "extensions": {
            "addedLinks": [{ "title": "Open in Acme", "targets": ["explore/toolbar"] }]
        }
    }"#;
    let ident = PluginIdentity::from_json(json).unwrap();
    assert_eq!(ident.id.as_str(), "acme-datasource");
    assert_eq!(ident.kind, PluginKind::DataSource);
    assert_eq!(ident.loading_strategy, LoadingStrategy::Script);
    assert_eq!(ident.class, PluginClass::External);
    let ext = ident.extensions.unwrap();
    assert!(ext.declares_added_link("Open in Acme"));
    assert!(!ext.declares_added_component("Open in Acme"));
}

#[test]
fn identity_from_json_rejects_bad_id() {
    let json = r#"{"id": "", "type": "app", "module": "m", "version": "1"}"#;
    assert!(PluginIdentity::from_json(json).is_err());
}

#[test]
fn declarations_lookup_by_kind() {
    let decl = ExtensionDeclarations {
        exposed_components: vec![DeclaredExposedComponent { id: "acme/widget/v1".into(), title: "Widget".into() }],
        added_functions: vec![DeclaredExtension { title: "notify".into(), targets: vec![] }],
        ..Default::default()
    };
    assert!(decl.declares_exposed_component("acme/widget/v1"));
    assert!(decl.declares_added_function("notify"));
    assert!(!decl.declares_added_link("notify"));
}
