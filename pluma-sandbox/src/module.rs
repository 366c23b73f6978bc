//! Module format detection.
//!
//! Plugin bundles arrive in one of several legacy whole-file wrapper formats.
//! [`ModuleFormat::detect`] sniffs the wrapper once and the rest of the
//! pipeline consumes the resulting descriptor.

use std::sync::LazyLock;

use regex::Regex;

/// Name of the definer function bound in every realm in place of a global
/// `define`, so plugin AMD wrappers never reach the host's own module loader.
pub const ISOLATED_DEFINE: &str = "__pluma_amd_define";

static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*(?:"([^"\\]*)"|'([^'\\]*)')"#).unwrap());

/// The wrapper a module's source is written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleFormat {
    /// `define(function () { ... })` or `define({ ... })`
    Bare,
    /// `define(["dep-a", "dep-b"], function (a, b) { ... })`
    DependencyArray { dependencies: Vec<String> },
    /// `define("name", ["dep"], function (dep) { ... })`
    Named {
        name: String,
        dependencies: Vec<String>,
    },
    /// `System.register(["dep"], function (exports) { ... })`
    SystemRegister { dependencies: Vec<String> },
    /// No recognised wrapper.
    Plain,
}

impl ModuleFormat {
    /// Detects the wrapper of a whole module file. Leading comments,
    /// whitespace and a `"use strict"` directive are skipped.
    pub fn detect(source: &str) -> Self {
        let body = skip_preamble(source);
        if let Some(rest) = strip_call(body, "define") {
            return detect_define(rest);
        }
        if let Some(rest) = strip_call(body, "System.register") {
            let dependencies = parse_string_array(rest).map(|(deps, _)| deps).unwrap_or_default();
            return ModuleFormat::SystemRegister { dependencies };
        }
        ModuleFormat::Plain
    }

    /// Formats whose `define` call must be bound to the isolated definer.
    pub fn uses_define(&self) -> bool {
        matches!(
            self,
            ModuleFormat::Bare | ModuleFormat::DependencyArray { .. } | ModuleFormat::Named { .. }
        )
    }

    pub fn dependencies(&self) -> &[String] {
        match self {
            ModuleFormat::DependencyArray { dependencies }
            | ModuleFormat::Named { dependencies, .. }
            | ModuleFormat::SystemRegister { dependencies } => dependencies,
            ModuleFormat::Bare | ModuleFormat::Plain => &[],
        }
    }
}

/// Module source ready for evaluation.
#[derive(Debug, Clone)]
pub struct ModuleSource {
    /// Address the source was fetched from (cache-bust token stripped).
    pub address: String,
    pub text: String,
    pub format: ModuleFormat,
}

impl ModuleSource {
    /// Wraps already-transformed text; `format` is the format detected
    /// before any rewriting.
    pub fn new(address: impl Into<String>, text: impl Into<String>, format: ModuleFormat) -> Self {
        Self {
            address: address.into(),
            text: text.into(),
            format,
        }
    }

    /// Builds a source and detects its format from the text.
    pub fn detect(address: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let format = ModuleFormat::detect(&text);
        Self::new(address, text, format)
    }
}

fn detect_define(args: &str) -> ModuleFormat {
    let args = args.trim_start();
    if let Some((deps, _)) = parse_string_array(args) {
        return ModuleFormat::DependencyArray { dependencies: deps };
    }
    if let Some(caps) = STRING_LITERAL.captures(args) {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let after_name = &args[caps.get(0).map_or(0, |m| m.end())..];
        let dependencies = after_name
            .trim_start()
            .strip_prefix(',')
            .and_then(parse_string_array)
            .map(|(deps, _)| deps)
            .unwrap_or_default();
        return ModuleFormat::Named { name, dependencies };
    }
    ModuleFormat::Bare
}

/// Parses a `["a", 'b']` literal at the start of `input`. Returns the items and
/// the remaining input, or `None` if `input` does not start with a string array.
fn parse_string_array(input: &str) -> Option<(Vec<String>, &str)> {
    let mut rest = input.trim_start().strip_prefix('[')?;
    let mut items = Vec::new();
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix(']') {
            return Some((items, after));
        }
        let caps = STRING_LITERAL.captures(trimmed)?;
        let item = caps.get(1).or_else(|| caps.get(2))?.as_str().to_string();
        items.push(item);
        rest = &trimmed[caps.get(0)?.end()..];
        let trimmed = rest.trim_start();
        rest = match trimmed.strip_prefix(',') {
            Some(after) => after,
            None if trimmed.starts_with(']') => trimmed,
            None => return None,
        };
    }
}

/// Matches `name(` at the start of `input`, allowing whitespace before the paren.
fn strip_call<'a>(input: &'a str, name: &str) -> Option<&'a str> {
    input
        .strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')
}

fn skip_preamble(mut source: &str) -> &str {
    loop {
        let trimmed = source.trim_start();
        if let Some(rest) = trimmed.strip_prefix("//") {
            source = rest.split_once('\n').map_or("", |(_, after)| after);
        } else if let Some(rest) = trimmed.strip_prefix("/*") {
            source = rest.split_once("*/").map_or("", |(_, after)| after);
        } else if let Some(rest) = trimmed
            .strip_prefix("\"use strict\"")
            .or_else(|| trimmed.strip_prefix("'use strict'"))
        {
            source = rest.trim_start().strip_prefix(';').unwrap_or(rest);
        } else {
            return trimmed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_bare_define() {
        assert_eq!(ModuleFormat::detect("define(function () { return {}; });"), ModuleFormat::Bare);
        assert_eq!(ModuleFormat::detect("define({ plugin: 1 })"), ModuleFormat::Bare);
    }

    #[test]
    fn detects_dependency_array() {
        let src = r#"define(["@pluma/data", 'react'], function (d, r) { return {}; });"#;
        assert_eq!(
            ModuleFormat::detect(src),
            ModuleFormat::DependencyArray {
                dependencies: vec!["@pluma/data".into(), "react".into()]
            }
        );
    }

    #[test]
    fn detects_empty_dependency_array() {
        assert_eq!(
            ModuleFormat::detect("define([], () => ({}))"),
            ModuleFormat::DependencyArray { dependencies: vec![] }
        );
    }

    #[test]
    fn detects_named_define() {
        let src = r#"define("acme-panel", ["react"], function (r) {});"#;
        assert_eq!(
            ModuleFormat::detect(src),
            ModuleFormat::Named {
                name: "acme-panel".into(),
                dependencies: vec!["react".into()]
            }
        );
        assert_eq!(
            ModuleFormat::detect("define('solo', function () {})"),
            ModuleFormat::Named {
                name: "solo".into(),
                dependencies: vec![]
            }
        );
    }

    #[test]
    fn skips_license_comments_and_directives() {
        let src = "/*! For license information please see module.js.LICENSE.txt */\n// built\n\"use strict\";\ndefine([\"react\"], function (r) {});";
        assert_eq!(
            ModuleFormat::detect(src),
            ModuleFormat::DependencyArray {
                dependencies: vec!["react".into()]
            }
        );
    }

    #[test]
    fn detects_system_register() {
        let src = "System.register(['react'], function (exports) { return {}; });";
        assert_eq!(
            ModuleFormat::detect(src),
            ModuleFormat::SystemRegister {
                dependencies: vec!["react".into()]
            }
        );
    }

    #[test]
    fn plain_source_has_no_wrapper() {
        assert_eq!(ModuleFormat::detect("export const plugin = {};"), ModuleFormat::Plain);
        // A define call later in the file is not a whole-file wrapper.
        assert_eq!(ModuleFormat::detect("var x = 1; define(function(){})"), ModuleFormat::Plain);
        assert_eq!(ModuleFormat::detect("definedValue(1)"), ModuleFormat::Plain);
    }

    #[test]
    fn uses_define_only_for_amd_formats() {
        assert!(ModuleFormat::Bare.uses_define());
        assert!(!ModuleFormat::Plain.uses_define());
        assert!(!ModuleFormat::SystemRegister { dependencies: vec![] }.uses_define());
    }
}
