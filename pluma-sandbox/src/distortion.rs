//! Distortion table: substitution rules the membrane applies before any
//! host reference reaches sandboxed code.
//!
//! Static entries match a host value by identity. Live distortions are
//! predicates evaluated on every crossing, for categories that cannot be
//! enumerated up front (DOM elements, regular expressions). The table is
//! append-only: entries are added lazily but never removed.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use crate::dom::{Element, SANDBOX_ATTRIBUTE};
use crate::membrane::Membrane;
use crate::value::{ObjectId, Value};

/// What the membrane does with a matched value.
#[derive(Debug, Clone)]
pub enum Distortion {
    /// Hand the sandbox this value instead.
    Replace(Value),
    /// Refuse the crossing with a capability error.
    Deny { operation: String },
}

#[derive(Debug, Clone)]
pub struct DistortionEntry {
    pub label: String,
    pub distortion: Distortion,
}

/// A distortion evaluated at access time.
pub trait LiveDistortion: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns a distortion for `value`, or `None` to let it through unchanged.
    fn distort(&self, value: &Value, membrane: &Membrane) -> Option<Distortion>;
}

pub struct DistortionTable {
    statics: RwLock<HashMap<ObjectId, DistortionEntry>>,
    live: Vec<Box<dyn LiveDistortion>>,
}

impl DistortionTable {
    /// An empty table with no live distortions.
    pub fn new() -> Self {
        Self {
            statics: RwLock::new(HashMap::new()),
            live: Vec::new(),
        }
    }

    /// A table with the DOM element and regular expression live distortions.
    pub fn with_dom_defaults() -> Self {
        Self::new()
            .with_live(Box::new(ElementDistortion))
            .with_live(Box::new(RegExpDistortion))
    }

    pub fn with_live(mut self, distortion: Box<dyn LiveDistortion>) -> Self {
        self.live.push(distortion);
        self
    }

    /// Adds a static entry for a reference value. Returns `false` if the value
    /// is a primitive or already has an entry; existing entries are never replaced.
    pub fn insert(&self, target: &Value, label: impl Into<String>, distortion: Distortion) -> bool {
        let Some(id) = target.identity() else {
            return false;
        };
        let mut statics = self.statics.write().unwrap();
        if statics.contains_key(&id) {
            return false;
        }
        statics.insert(
            id,
            DistortionEntry {
                label: label.into(),
                distortion,
            },
        );
        true
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.statics.read().unwrap().contains_key(&id)
    }

    pub fn static_len(&self) -> usize {
        self.statics.read().unwrap().len()
    }

    pub fn live_names(&self) -> Vec<&'static str> {
        self.live.iter().map(|d| d.name()).collect()
    }

    fn lookup_static(&self, value: &Value) -> Option<Distortion> {
        let id = value.identity()?;
        self.statics
            .read()
            .unwrap()
            .get(&id)
            .map(|entry| entry.distortion.clone())
    }

    /// Static entries by identity first, then live distortions in registration order.
    pub fn lookup(&self, value: &Value, membrane: &Membrane) -> Option<Distortion> {
        if let Some(id) = value.identity() {
            if let Some(entry) = self.statics.read().unwrap().get(&id) {
                debug!(plugin_id = %membrane.plugin_id(), label = %entry.label, "Static distortion applied");
                return Some(entry.distortion.clone());
            }
        }
        self.live
            .iter()
            .find_map(|live| live.distort(value, membrane))
    }
}

impl Default for DistortionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Substitutes a disposable mock for any element the plugin does not own.
///
/// The mock is remembered as a static entry so repeated reads of the same
/// host element yield the same mock.
pub struct ElementDistortion;

impl LiveDistortion for ElementDistortion {
    fn name(&self) -> &'static str {
        "dom-element"
    }

    fn distort(&self, value: &Value, membrane: &Membrane) -> Option<Distortion> {
        let Value::Element(element) = value else {
            return None;
        };
        if membrane.is_real_element(element) {
            return None;
        }
        let mock = Element::new(element.tag_name());
        membrane.record_mock(&mock);
        let replacement = Value::Element(mock);
        let owner = element
            .ancestors_inclusive()
            .find_map(|el| el.attribute(SANDBOX_ATTRIBUTE));
        debug!(
            plugin_id = %membrane.plugin_id(),
            tag = %element.tag_name(),
            owner = ?owner,
            "Element outside plugin fragment replaced with mock"
        );
        if !membrane
            .distortions()
            .insert(value, "mock element", Distortion::Replace(replacement.clone()))
        {
            // Another access raced us to the memo; use its mock.
            return membrane.distortions().lookup_static(value);
        }
        Some(Distortion::Replace(replacement))
    }
}

/// Hands the sandbox its own copy of a regular expression so the host
/// instance's matching state is never shared across the boundary.
pub struct RegExpDistortion;

impl LiveDistortion for RegExpDistortion {
    fn name(&self) -> &'static str {
        "regexp-copy"
    }

    fn distort(&self, value: &Value, _membrane: &Membrane) -> Option<Distortion> {
        match value {
            Value::RegExp(re) => Some(Distortion::Replace(Value::RegExp(re.duplicate()))),
            _ => None,
        }
    }
}
