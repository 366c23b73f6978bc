//! Source-to-source rewrites applied to fetched module text.
//!
//! All rewrites are literal string substitutions; no JavaScript parsing.

use std::sync::LazyLock;

use pluma_sandbox::{ISOLATED_DEFINE, ModuleFormat};
use regex::{Captures, Regex};

use crate::resolver::PLUGINS_PATH;

static BARE_CSS_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(["'])(plugins/[^"'\n]+?\.css)(["'])"#).unwrap());

static SOURCE_MAPPING_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(//#\s*sourceMappingURL=)(\S+)").unwrap());

/// Binds the module's `define` to the isolated definer so an AMD wrapper
/// never reaches the host's own module loader. Other formats pass through.
pub fn isolate_amd_define(source: &str, format: &ModuleFormat) -> String {
    if !format.uses_define() {
        return source.to_string();
    }
    format!("(function(define) {{\n{source}\n}})({ISOLATED_DEFINE});")
}

/// Rewrites local asset references in a CDN-hosted module to the CDN base.
///
/// The base is the part of `address` before `/public/plugins/`. Three forms
/// are rewritten:
/// - `public/plugins/<id>/…` with or without a leading slash
/// - bare `"plugins/….css"` string literals
/// - a relative `sourceMappingURL` comment
///
/// Already-qualified references are left alone, so the rewrite is idempotent.
pub fn rewrite_cdn_assets(source: &str, address: &str, plugin_id: &str) -> String {
    let marker = format!("/{PLUGINS_PATH}");
    let Some(idx) = address.find(&marker) else {
        return source.to_string();
    };
    let base = &address[..idx];

    let local_asset = Regex::new(&format!(
        r"(?m)(^|[^\w./:-])/?{}{}/",
        regex::escape(PLUGINS_PATH),
        regex::escape(plugin_id)
    ));
    let Ok(local_asset) = local_asset else {
        return source.to_string();
    };

    let rewritten = local_asset.replace_all(source, |caps: &Captures| {
        format!("{}{base}/{PLUGINS_PATH}{plugin_id}/", &caps[1])
    });

    let rewritten = BARE_CSS_REFERENCE.replace_all(&rewritten, |caps: &Captures| {
        format!("{}{base}/public/{}{}", &caps[1], &caps[2], &caps[3])
    });

    let module_dir = address
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit_once('/'))
        .map_or(base, |(dir, _)| dir);
    SOURCE_MAPPING_URL
        .replace_all(&rewritten, |caps: &Captures| {
            let target = &caps[2];
            if target.starts_with("data:") || target.starts_with('/') || target.contains("://") {
                caps[0].to_string()
            } else {
                format!("{}{module_dir}/{target}", &caps[1])
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ADDRESS: &str = "http://cdn/foo/1.2.3/public/plugins/foo/module.js";

    #[test]
    fn rewrites_quoted_local_path() {
        assert_eq!(
            rewrite_cdn_assets(r#""public/plugins/foo/template.html""#, ADDRESS, "foo"),
            r#""http://cdn/foo/1.2.3/public/plugins/foo/template.html""#
        );
    }

    #[test]
    fn leading_slash_and_expression_forms() {
        let src = "var a = '/public/plugins/foo/img/logo.svg';\nvar b = base+\"public/plugins/foo/x.html\";";
        let expected = "var a = 'http://cdn/foo/1.2.3/public/plugins/foo/img/logo.svg';\nvar b = base+\"http://cdn/foo/1.2.3/public/plugins/foo/x.html\";";
        assert_eq!(rewrite_cdn_assets(src, ADDRESS, "foo"), expected);
    }

    #[test]
    fn line_start_occurrence_is_rewritten() {
        let src = "x = `\npublic/plugins/foo/a.png`";
        assert_eq!(
            rewrite_cdn_assets(src, ADDRESS, "foo"),
            "x = `\nhttp://cdn/foo/1.2.3/public/plugins/foo/a.png`"
        );
    }

    #[test]
    fn unrelated_text_untouched() {
        let src = "'public/plugins/bar/a.png' + 'mypublic/plugins/foo/' + 'public/plugins/foobar/x'";
        assert_eq!(rewrite_cdn_assets(src, ADDRESS, "foo"), src);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let src = "load('public/plugins/foo/a.html'); load(\"plugins/foo/styles/dark.css\");";
        let once = rewrite_cdn_assets(src, ADDRESS, "foo");
        assert_eq!(rewrite_cdn_assets(&once, ADDRESS, "foo"), once);
    }

    #[test]
    fn bare_css_references() {
        assert_eq!(
            rewrite_cdn_assets("import('plugins/foo/styles/light.css')", ADDRESS, "foo"),
            "import('http://cdn/foo/1.2.3/public/plugins/foo/styles/light.css')"
        );
    }

    #[test]
    fn source_mapping_url() {
        assert_eq!(
            rewrite_cdn_assets("code();\n//# sourceMappingURL=module.js.map", ADDRESS, "foo"),
            "code();\n//# sourceMappingURL=http://cdn/foo/1.2.3/public/plugins/foo/module.js.map"
        );
        let inline = "//# sourceMappingURL=data:application/json;base64,e30=";
        assert_eq!(rewrite_cdn_assets(inline, ADDRESS, "foo"), inline);
    }

    #[test]
    fn address_without_plugins_path_is_untouched() {
        let src = "'public/plugins/foo/a.png'";
        assert_eq!(rewrite_cdn_assets(src, "http://cdn/elsewhere.js", "foo"), src);
    }

    #[test]
    fn amd_modules_get_isolated_define() {
        let src = "define(['react'], function (r) {});";
        let out = isolate_amd_define(src, &ModuleFormat::detect(src));
        assert_eq!(
            out,
            "(function(define) {\ndefine(['react'], function (r) {});\n})(__pluma_amd_define);"
        );
        let plain = "export const x = 1;";
        assert_eq!(isolate_amd_define(plain, &ModuleFormat::Plain), plain);
    }
}
