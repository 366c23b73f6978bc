//! The membrane: the single dispatcher every host value passes through on
//! its way into plugin code.
//!
//! `admit` consults the distortion table (by identity, then by type tag via
//! live distortions) and only then wraps the result in a [`Capability`].
//! A transparent membrane skips distortions entirely and is used for
//! plugins that are not sandboxed.
//!
//! The way back out is [`Membrane::hand_back`]: plugin code that needs a
//! capability as a plain [`Value`] gets the membrane's stand-in for it, never
//! the host target. Stand-ins are swapped back for their targets when they
//! reach the host again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use pluma_types::PluginId;
use tracing::{debug, warn};

use crate::capability::{
    Capability, DocumentCapability, ElementCapability, FunctionCapability, ObjectCapability,
    StyleCapability,
};
use crate::distortion::{Distortion, DistortionTable};
use crate::dom::{DocumentRef, ElementRef, SANDBOX_ATTRIBUTE};
use crate::error::SandboxError;
use crate::value::{Object, ObjectId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembraneMode {
    /// No distortions; every object is live.
    Transparent,
    /// Distortion table applied on every crossing.
    Distorting,
}

pub struct Membrane {
    plugin_id: PluginId,
    mode: MembraneMode,
    document: Option<DocumentRef>,
    distortions: DistortionTable,
    /// Objects whose in-place mutation is visible on both sides.
    live_targets: RwLock<HashSet<ObjectId>>,
    /// Elements created by the plugin itself.
    owned_elements: RwLock<HashSet<ObjectId>>,
    /// Mock elements handed out in place of host elements.
    mocks: RwLock<HashSet<ObjectId>>,
    /// Host reference values that have crossed into the sandbox.
    admitted: RwLock<HashSet<ObjectId>>,
    /// Substitutes produced by `Replace` distortions.
    substitutes: RwLock<HashSet<ObjectId>>,
    /// Plugin functions that admit their own arguments.
    mediating: RwLock<HashSet<ObjectId>>,
    /// Host target id to the stand-in handed to plugin code.
    stand_ins: RwLock<HashMap<ObjectId, Value>>,
    /// Stand-in id to the host target it replaces.
    stood_for: RwLock<HashMap<ObjectId, Value>>,
}

impl Membrane {
    pub fn transparent(plugin_id: PluginId) -> Arc<Self> {
        Arc::new(Self::build(
            plugin_id,
            MembraneMode::Transparent,
            None,
            DistortionTable::new(),
        ))
    }

    pub fn distorting(
        plugin_id: PluginId,
        document: DocumentRef,
        distortions: DistortionTable,
    ) -> Arc<Self> {
        Arc::new(Self::build(
            plugin_id,
            MembraneMode::Distorting,
            Some(document),
            distortions,
        ))
    }

    fn build(
        plugin_id: PluginId,
        mode: MembraneMode,
        document: Option<DocumentRef>,
        distortions: DistortionTable,
    ) -> Self {
        Self {
            plugin_id,
            mode,
            document,
            distortions,
            live_targets: RwLock::new(HashSet::new()),
            owned_elements: RwLock::new(HashSet::new()),
            mocks: RwLock::new(HashSet::new()),
            admitted: RwLock::new(HashSet::new()),
            substitutes: RwLock::new(HashSet::new()),
            mediating: RwLock::new(HashSet::new()),
            stand_ins: RwLock::new(HashMap::new()),
            stood_for: RwLock::new(HashMap::new()),
        }
    }

    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    pub fn mode(&self) -> MembraneMode {
        self.mode
    }

    pub fn distortions(&self) -> &DistortionTable {
        &self.distortions
    }

    /// Mediates one host value crossing into the sandbox.
    pub fn admit(self: &Arc<Self>, value: Value) -> Result<Capability, SandboxError> {
        if value.is_primitive() {
            return Ok(Capability::Primitive(value));
        }
        let value = match self.mode {
            MembraneMode::Transparent => value,
            MembraneMode::Distorting => match self.distortions.lookup(&value, self) {
                Some(Distortion::Replace(substitute)) => {
                    if let Some(id) = substitute.identity() {
                        self.substitutes.write().unwrap().insert(id);
                    }
                    substitute
                }
                Some(Distortion::Deny { operation }) => {
                    warn!(
                        plugin_id = %self.plugin_id,
                        operation = %operation,
                        "Sandbox access to protected host value denied"
                    );
                    return Err(SandboxError::CapabilityDenied {
                        plugin_id: self.plugin_id.to_string(),
                        operation,
                    });
                }
                None => value,
            },
        };
        if let Some(id) = value.identity() {
            self.admitted.write().unwrap().insert(id);
        }
        Ok(self.wrap(value))
    }

    /// Admits each value in order, failing on the first denial.
    pub fn admit_all(self: &Arc<Self>, values: &[Value]) -> Result<Vec<Capability>, SandboxError> {
        values.iter().cloned().map(|v| self.admit(v)).collect()
    }

    /// Turns a capability back into a value plugin code may hold.
    ///
    /// Primitives, regexps, styles, mocks, substitutes and values the plugin
    /// owns come back as they are. A host function comes back as a stand-in
    /// that mediates every call, and a host object as a stand-in copy whose
    /// properties were admitted and handed back in turn. Host elements that
    /// are not mocked and the document come back as `undefined`.
    pub fn hand_back(self: &Arc<Self>, capability: &Capability) -> Value {
        let mut visited = HashSet::new();
        self.hand_back_inner(capability, &mut visited)
    }

    fn hand_back_inner(
        self: &Arc<Self>,
        capability: &Capability,
        visited: &mut HashSet<ObjectId>,
    ) -> Value {
        let value = capability.to_value();
        let Some(id) = value.identity() else {
            return value;
        };
        if self.mode == MembraneMode::Transparent
            || !self.is_host_value(id)
            || self.substitutes.read().unwrap().contains(&id)
        {
            return value;
        }
        match (capability, value) {
            (Capability::Element(element), value) => {
                if element.is_mock() || self.owned_elements.read().unwrap().contains(&id) {
                    value
                } else {
                    Value::Undefined
                }
            }
            (Capability::Document(_), _) => Value::Undefined,
            (Capability::Function(_), Value::Function(target)) => {
                self.function_stand_in(id, Value::Function(target))
            }
            (Capability::Object(object), Value::Object(target)) => {
                let stand_in = self.stand_in(id, Value::Object(target), || Value::Object(Object::new()));
                if let Value::Object(copy) = &stand_in {
                    if visited.insert(id) {
                        for key in object.keys() {
                            // Denied properties are left out of the copy.
                            if let Ok(property) = object.get(&key) {
                                copy.set(key, self.hand_back_inner(&property, visited));
                            }
                        }
                    }
                }
                stand_in
            }
            (_, value) => value,
        }
    }

    fn function_stand_in(self: &Arc<Self>, id: ObjectId, target: Value) -> Value {
        let Value::Function(function) = target.clone() else {
            return Value::Undefined;
        };
        let membrane = Arc::downgrade(self);
        self.stand_in(id, target, move || {
            Value::function(function.name().to_string(), move |args| {
                let Some(membrane) = membrane.upgrade() else {
                    return Ok(Value::Undefined);
                };
                let args: Vec<Value> = args.iter().cloned().map(|a| membrane.restore(a)).collect();
                let result = membrane.admit(function.call(&args)?)?;
                Ok(membrane.hand_back(&result))
            })
        })
    }

    /// The cached stand-in for host target `id`, created on first use.
    fn stand_in(&self, id: ObjectId, target: Value, create: impl FnOnce() -> Value) -> Value {
        let mut stand_ins = self.stand_ins.write().unwrap();
        if let Some(existing) = stand_ins.get(&id) {
            return existing.clone();
        }
        let stand_in = create();
        if let Some(stand_in_id) = stand_in.identity() {
            self.stood_for.write().unwrap().insert(stand_in_id, target);
        }
        stand_ins.insert(id, stand_in.clone());
        debug!(plugin_id = %self.plugin_id, target = %id, "Stand-in created");
        stand_in
    }

    /// Swaps a stand-in for the host target it replaces. Anything else is
    /// returned unchanged.
    pub fn restore(&self, value: Value) -> Value {
        value
            .identity()
            .and_then(|id| self.stood_for.read().unwrap().get(&id).cloned())
            .unwrap_or(value)
    }

    /// Records a plugin function that admits its own arguments.
    pub(crate) fn record_mediating(&self, id: ObjectId) {
        self.mediating.write().unwrap().insert(id);
    }

    pub(crate) fn is_mediating(&self, id: ObjectId) -> bool {
        self.mediating.read().unwrap().contains(&id)
    }

    /// Wraps a value the realm itself created for the plugin (`exports`,
    /// `module`). Such values are live and never count as host values.
    pub(crate) fn wrap_owned(self: &Arc<Self>, value: Value) -> Capability {
        if let Some(id) = value.identity() {
            self.mark_live(id);
        }
        self.wrap(value)
    }

    fn wrap(self: &Arc<Self>, value: Value) -> Capability {
        match value {
            Value::Object(target) => Capability::Object(ObjectCapability::new(target, Arc::clone(self))),
            Value::Function(target) => {
                Capability::Function(FunctionCapability::new(target, Arc::clone(self)))
            }
            Value::Element(target) => {
                let mock = self.is_mock(target.id());
                Capability::Element(ElementCapability::new(target, mock, Arc::clone(self)))
            }
            Value::Style(target) => {
                // Style objects must mutate in place or layout drifts between realms.
                self.mark_live(target.id());
                Capability::Style(StyleCapability::new(target))
            }
            Value::Document(target) => {
                Capability::Document(DocumentCapability::new(target, Arc::clone(self)))
            }
            Value::RegExp(re) => Capability::RegExp(re),
            primitive => Capability::Primitive(primitive),
        }
    }

    pub fn mark_live(&self, id: ObjectId) {
        if self.live_targets.write().unwrap().insert(id) {
            debug!(plugin_id = %self.plugin_id, target = %id, "Live target registered");
        }
    }

    pub fn is_live(&self, id: ObjectId) -> bool {
        self.mode == MembraneMode::Transparent || self.live_targets.read().unwrap().contains(&id)
    }

    pub(crate) fn adopt_element(&self, element: &ElementRef) {
        self.owned_elements.write().unwrap().insert(element.id());
    }

    pub(crate) fn record_mock(&self, element: &ElementRef) {
        self.mocks.write().unwrap().insert(element.id());
    }

    pub fn is_mock(&self, id: ObjectId) -> bool {
        self.mocks.read().unwrap().contains(&id)
    }

    /// True if the value entered the sandbox from the host side.
    pub fn is_host_value(&self, id: ObjectId) -> bool {
        self.admitted.read().unwrap().contains(&id)
    }

    /// Whether the plugin may see `element` itself rather than a mock: the
    /// document skeleton, elements the plugin created, mocks already handed
    /// out, and anything inside a fragment tagged with this plugin's id.
    pub fn is_real_element(&self, element: &ElementRef) -> bool {
        if self.mode == MembraneMode::Transparent {
            return true;
        }
        if self
            .document
            .as_ref()
            .is_some_and(|doc| doc.is_structural(element))
        {
            return true;
        }
        let id = element.id();
        if self.is_mock(id) || self.owned_elements.read().unwrap().contains(&id) {
            return true;
        }
        element
            .closest_with_attribute(SANDBOX_ATTRIBUTE, self.plugin_id.as_str())
            .is_some()
    }
}

impl std::fmt::Debug for Membrane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Membrane")
            .field("plugin_id", &self.plugin_id)
            .field("mode", &self.mode)
            .field("static_distortions", &self.distortions.static_len())
            .finish()
    }
}
