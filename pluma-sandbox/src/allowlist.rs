//! Host modules a sandboxed plugin may name as `define` dependencies.

use std::collections::BTreeMap;

use crate::value::Value;

/// Reserved prefix that routes a specifier to a host-shared module instead of
/// the network.
pub const SHARED_DEPENDENCY_PREFIX: &str = "pluma-shared:";

/// Fixed table of host-exposed modules. Dependencies are resolved here and
/// never against the network.
#[derive(Debug, Clone, Default)]
pub struct DependencyAllowList {
    modules: BTreeMap<String, Value>,
}

impl DependencyAllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, name: impl Into<String>, exports: Value) -> Self {
        self.insert(name, exports);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, exports: Value) {
        let name = name.into();
        let name = strip_shared_prefix(&name).to_string();
        self.modules.insert(name, exports);
    }

    /// Looks up a dependency by name. The shared prefix is accepted and ignored.
    pub fn resolve(&self, name: &str) -> Option<Value> {
        self.modules.get(strip_shared_prefix(name)).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(strip_shared_prefix(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

fn strip_shared_prefix(name: &str) -> &str {
    name.strip_prefix(SHARED_DEPENDENCY_PREFIX).unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_with_and_without_prefix() {
        let list = DependencyAllowList::new().with_module("react", Value::from("react-exports"));
        assert!(list.contains("react"));
        assert!(list.contains("pluma-shared:react"));
        assert_eq!(list.resolve("pluma-shared:react").unwrap().as_str(), Some("react-exports"));
        assert!(list.resolve("lodash").is_none());
    }

    #[test]
    fn prefixed_registration_is_normalized() {
        let mut list = DependencyAllowList::new();
        list.insert("pluma-shared:@pluma/ui", Value::Null);
        assert_eq!(list.names().collect::<Vec<_>>(), vec!["@pluma/ui"]);
        assert_eq!(list.len(), 1);
    }
}
