//! Typed capabilities: the only handles sandboxed code holds on host values.
//!
//! Each capability exposes an allow-listed operation set. Every value an
//! operation returns goes back through the membrane, so a capability never
//! leaks an unmediated reference.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::dom::{DocumentRef, ElementRef, SANDBOX_ATTRIBUTE, StyleRef};
use crate::error::SandboxError;
use crate::membrane::Membrane;
use crate::value::{FunctionRef, ObjectRef, RegExpRef, ScriptError, TypeTag, Value};

/// A mediated handle on a value that crossed into the sandbox.
#[derive(Debug, Clone)]
pub enum Capability {
    Primitive(Value),
    Object(ObjectCapability),
    Function(FunctionCapability),
    Element(ElementCapability),
    Style(StyleCapability),
    Document(DocumentCapability),
    /// Sandbox-local copy; safe to use directly.
    RegExp(RegExpRef),
}

impl Capability {
    pub fn undefined() -> Self {
        Capability::Primitive(Value::Undefined)
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Capability::Primitive(v) => v.type_tag(),
            Capability::Object(_) => TypeTag::Object,
            Capability::Function(_) => TypeTag::Function,
            Capability::Element(_) => TypeTag::Element,
            Capability::Style(_) => TypeTag::Style,
            Capability::Document(_) => TypeTag::Document,
            Capability::RegExp(_) => TypeTag::RegExp,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Capability::Primitive(Value::Undefined))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Capability::Primitive(v) => v.as_str(),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Capability::Primitive(v) => v.as_number(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Capability::Primitive(v) => v.as_bool(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectCapability> {
        match self {
            Capability::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionCapability> {
        match self {
            Capability::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&ElementCapability> {
        match self {
            Capability::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&DocumentCapability> {
        match self {
            Capability::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_style(&self) -> Option<&StyleCapability> {
        match self {
            Capability::Style(s) => Some(s),
            _ => None,
        }
    }

    /// Property read; non-objects read as `undefined`.
    pub fn get(&self, key: &str) -> Result<Capability, SandboxError> {
        match self {
            Capability::Object(o) => o.get(key),
            _ => Ok(Capability::undefined()),
        }
    }

    /// Calls a function capability; anything else throws like calling a non-function.
    pub fn call(&self, args: &[Value]) -> Result<Capability, ScriptError> {
        match self {
            Capability::Function(f) => f.call(args),
            other => Err(ScriptError::new(format!(
                "{:?} is not a function",
                other.type_tag()
            ))),
        }
    }

    /// The value behind the handle: the host target of an admitted value, or
    /// the mock or substitute the membrane swapped in. Plugin code goes
    /// through [`Membrane::hand_back`] instead.
    pub(crate) fn to_value(&self) -> Value {
        match self {
            Capability::Primitive(v) => v.clone(),
            Capability::Object(o) => Value::Object(Arc::clone(&o.target)),
            Capability::Function(f) => Value::Function(Arc::clone(&f.target)),
            Capability::Element(e) => Value::Element(Arc::clone(&e.target)),
            Capability::Style(s) => Value::Style(Arc::clone(&s.target)),
            Capability::Document(d) => Value::Document(Arc::clone(&d.target)),
            Capability::RegExp(r) => Value::RegExp(Arc::clone(r)),
        }
    }
}

/// Property access on a host object. Writes reach the host only for live
/// targets; otherwise they land in a sandbox-local shadow.
#[derive(Clone)]
pub struct ObjectCapability {
    target: ObjectRef,
    shadow: Arc<RwLock<BTreeMap<String, Value>>>,
    membrane: Arc<Membrane>,
}

impl ObjectCapability {
    pub(crate) fn new(target: ObjectRef, membrane: Arc<Membrane>) -> Self {
        Self {
            target,
            shadow: Arc::new(RwLock::new(BTreeMap::new())),
            membrane,
        }
    }

    pub fn is_live(&self) -> bool {
        self.membrane.is_live(self.target.id())
    }

    pub fn get(&self, key: &str) -> Result<Capability, SandboxError> {
        let shadowed = self.shadow.read().unwrap().get(key).cloned();
        match shadowed {
            Some(value) => self.membrane.admit(value),
            None => self.membrane.admit(self.target.get(key)),
        }
    }

    pub fn set(&self, key: &str, value: Value) {
        if self.is_live() {
            self.target.set(key, value);
        } else {
            self.shadow.write().unwrap().insert(key.to_string(), value);
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.target.keys();
        for key in self.shadow.read().unwrap().keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }
}

impl std::fmt::Debug for ObjectCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCapability")
            .field("target", &self.target.id())
            .field("live", &self.is_live())
            .finish()
    }
}

/// A callable host function. Arguments flow host-ward as values; the
/// result flows back through the membrane.
#[derive(Clone)]
pub struct FunctionCapability {
    target: FunctionRef,
    membrane: Arc<Membrane>,
}

impl FunctionCapability {
    pub(crate) fn new(target: FunctionRef, membrane: Arc<Membrane>) -> Self {
        Self { target, membrane }
    }

    pub fn name(&self) -> &str {
        self.target.name()
    }

    /// Calls the host function. Stand-ins among `args` reach the host as the
    /// targets they replace.
    pub fn call(&self, args: &[Value]) -> Result<Capability, ScriptError> {
        let args: Vec<Value> = args.iter().cloned().map(|a| self.membrane.restore(a)).collect();
        let result = self.target.call(&args)?;
        Ok(self.membrane.admit(result)?)
    }
}

impl std::fmt::Debug for FunctionCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionCapability")
            .field("name", &self.target.name())
            .finish()
    }
}

/// A DOM element handle: either the real element (own fragment, document
/// skeleton) or a disposable mock with the same tag name.
#[derive(Clone)]
pub struct ElementCapability {
    target: ElementRef,
    mock: bool,
    membrane: Arc<Membrane>,
}

impl ElementCapability {
    pub(crate) fn new(target: ElementRef, mock: bool, membrane: Arc<Membrane>) -> Self {
        Self {
            target,
            mock,
            membrane,
        }
    }

    pub fn is_mock(&self) -> bool {
        self.mock
    }

    pub fn tag_name(&self) -> &str {
        self.target.tag_name()
    }

    pub fn get_attribute(&self, name: &str) -> Option<String> {
        self.target.attribute(name)
    }

    /// Sets an attribute. The ownership tag cannot be written from inside
    /// the sandbox, otherwise a plugin could claim another plugin's fragment.
    pub fn set_attribute(&self, name: &str, value: &str) -> Result<(), SandboxError> {
        if name.eq_ignore_ascii_case(SANDBOX_ATTRIBUTE) {
            return Err(self.denied(format!("write the {SANDBOX_ATTRIBUTE} attribute")));
        }
        self.target.set_attribute(name, value);
        Ok(())
    }

    pub fn remove_attribute(&self, name: &str) -> Result<(), SandboxError> {
        if name.eq_ignore_ascii_case(SANDBOX_ATTRIBUTE) {
            return Err(self.denied(format!("remove the {SANDBOX_ATTRIBUTE} attribute")));
        }
        self.target.remove_attribute(name);
        Ok(())
    }

    pub fn text_content(&self) -> String {
        self.target.text_content()
    }

    pub fn set_text_content(&self, text: &str) {
        self.target.set_text_content(text);
    }

    /// The element's inline style; always a live target.
    pub fn style(&self) -> StyleCapability {
        self.membrane.mark_live(self.target.style().id());
        StyleCapability::new(self.target.style())
    }

    pub fn parent(&self) -> Result<Option<Capability>, SandboxError> {
        self.target
            .parent()
            .map(|p| self.membrane.admit(Value::Element(p)))
            .transpose()
    }

    pub fn children(&self) -> Result<Vec<Capability>, SandboxError> {
        self.target
            .children()
            .into_iter()
            .map(|c| self.membrane.admit(Value::Element(c)))
            .collect()
    }

    /// Appends `child`. Appending an element into its own subtree throws.
    pub fn append_child(&self, child: &ElementCapability) -> Result<(), SandboxError> {
        if self.target.append_child(&child.target) {
            Ok(())
        } else {
            Err(self.denied(format!("append <{}> inside its own subtree", child.tag_name())))
        }
    }

    fn denied(&self, operation: String) -> SandboxError {
        SandboxError::CapabilityDenied {
            plugin_id: self.membrane.plugin_id().to_string(),
            operation,
        }
    }
}

impl std::fmt::Debug for ElementCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementCapability")
            .field("tag_name", &self.target.tag_name())
            .field("mock", &self.mock)
            .finish()
    }
}

/// Live inline-style handle: mutations are visible on both sides.
#[derive(Debug, Clone)]
pub struct StyleCapability {
    target: StyleRef,
}

impl StyleCapability {
    pub(crate) fn new(target: StyleRef) -> Self {
        Self { target }
    }

    pub fn get_property(&self, name: &str) -> Option<String> {
        self.target.get_property(name)
    }

    pub fn set_property(&self, name: &str, value: &str) {
        self.target.set_property(name, value);
    }

    pub fn remove_property(&self, name: &str) -> Option<String> {
        self.target.remove_property(name)
    }

    pub fn css_text(&self) -> String {
        self.target.css_text()
    }
}

/// Document access. Lookups are mediated; created elements belong to the plugin.
#[derive(Clone)]
pub struct DocumentCapability {
    target: DocumentRef,
    membrane: Arc<Membrane>,
}

impl DocumentCapability {
    pub(crate) fn new(target: DocumentRef, membrane: Arc<Membrane>) -> Self {
        Self { target, membrane }
    }

    pub fn body(&self) -> Result<Capability, SandboxError> {
        self.membrane.admit(Value::Element(self.target.body()))
    }

    pub fn head(&self) -> Result<Capability, SandboxError> {
        self.membrane.admit(Value::Element(self.target.head()))
    }

    pub fn document_element(&self) -> Result<Capability, SandboxError> {
        self.membrane.admit(Value::Element(self.target.document_element()))
    }

    pub fn get_element_by_id(&self, dom_id: &str) -> Result<Option<Capability>, SandboxError> {
        self.target
            .get_element_by_id(dom_id)
            .map(|el| self.membrane.admit(Value::Element(el)))
            .transpose()
    }

    pub fn create_element(&self, tag_name: &str) -> Result<Capability, SandboxError> {
        let element = self.target.create_element(tag_name);
        self.membrane.adopt_element(&element);
        self.membrane.admit(Value::Element(element))
    }
}

impl std::fmt::Debug for DocumentCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCapability")
            .field("document", &self.target.id())
            .finish()
    }
}
