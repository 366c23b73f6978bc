//! Host value model shared by the host, the membrane and script engines.
//!
//! Reference values (objects, functions, DOM nodes) carry an [`ObjectId`]
//! so the distortion table can match them by identity.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::dom::{DocumentRef, ElementRef, StyleRef};
use crate::error::SandboxError;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a reference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub(crate) fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Coarse type tag used by the membrane to pick a capability shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Undefined,
    Null,
    Bool,
    Number,
    String,
    Object,
    Function,
    Element,
    Style,
    Document,
    RegExp,
}

/// An error thrown by script code or by a host function.
#[derive(Debug, Clone)]
pub struct ScriptError {
    pub message: String,
    /// The thrown value, when the thrower raised something other than a plain message.
    pub thrown: Option<Value>,
    /// Set when a sandbox error propagated through plugin code via `?`.
    pub(crate) origin: Option<Box<SandboxError>>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            thrown: None,
            origin: None,
        }
    }

    pub fn thrown(value: Value) -> Self {
        Self {
            message: String::new(),
            thrown: Some(value),
            origin: None,
        }
    }

    /// Best human-readable message: a thrown error object's `message`
    /// property wins over the outer message.
    pub fn unwrap_message(&self) -> String {
        match &self.thrown {
            Some(Value::Object(obj)) => match obj.get("message") {
                Value::String(s) => s,
                _ if !self.message.is_empty() => self.message.clone(),
                _ => "uncaught exception".to_string(),
            },
            Some(Value::String(s)) => s.clone(),
            Some(other) if self.message.is_empty() => format!("uncaught {:?}", other.type_tag()),
            _ => self.message.clone(),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unwrap_message())
    }
}

impl std::error::Error for ScriptError {}

pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, ScriptError> + Send + Sync;

/// A callable value. Host functions and sandbox-created functions share this shape.
pub struct Function {
    id: ObjectId,
    name: String,
    call: Box<NativeFn>,
}

pub type FunctionRef = Arc<Function>;

impl Function {
    pub fn new(
        name: impl Into<String>,
        call: impl Fn(&[Value]) -> Result<Value, ScriptError> + Send + Sync + 'static,
    ) -> FunctionRef {
        Arc::new(Self {
            id: ObjectId::next(),
            name: name.into(),
            call: Box::new(call),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, ScriptError> {
        (self.call)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// A mutable property bag.
pub struct Object {
    id: ObjectId,
    props: RwLock<BTreeMap<String, Value>>,
}

pub type ObjectRef = Arc<Object>;

impl Object {
    pub fn new() -> ObjectRef {
        Arc::new(Self {
            id: ObjectId::next(),
            props: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Returns the property value, or `Undefined` when absent.
    pub fn get(&self, key: &str) -> Value {
        self.props
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    pub fn has(&self, key: &str) -> bool {
        self.props.read().unwrap().contains_key(key)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.props.write().unwrap().insert(key.into(), value);
    }

    pub fn keys(&self) -> Vec<String> {
        self.props.read().unwrap().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.props
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys only: property graphs may be cyclic.
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("keys", &self.keys())
            .finish()
    }
}

/// A compiled regular expression value.
#[derive(Debug)]
pub struct RegExp {
    id: ObjectId,
    source: String,
    compiled: regex::Regex,
}

pub type RegExpRef = Arc<RegExp>;

impl RegExp {
    pub fn new(source: &str) -> Result<RegExpRef, ScriptError> {
        let compiled = regex::Regex::new(source)
            .map_err(|e| ScriptError::new(format!("invalid regular expression: {e}")))?;
        Ok(Arc::new(Self {
            id: ObjectId::next(),
            source: source.to_string(),
            compiled,
        }))
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.compiled.is_match(haystack)
    }

    /// A fresh instance with the same pattern and a new identity.
    pub fn duplicate(&self) -> RegExpRef {
        Arc::new(Self {
            id: ObjectId::next(),
            source: self.source.clone(),
            compiled: self.compiled.clone(),
        })
    }
}

/// Any value that can flow between host, membrane and plugin code.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(ObjectRef),
    Function(FunctionRef),
    Element(ElementRef),
    Style(StyleRef),
    Document(DocumentRef),
    RegExp(RegExpRef),
}

impl Value {
    /// Builds a fresh object from key/value pairs.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let obj = Object::new();
        for (k, v) in entries {
            obj.set(k, v);
        }
        Value::Object(obj)
    }

    /// Builds an array-like object: index keys plus `length`.
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        let obj = Object::new();
        let mut len = 0usize;
        for (i, item) in items.into_iter().enumerate() {
            obj.set(i.to_string(), item);
            len = i + 1;
        }
        obj.set("length", Value::Number(len as f64));
        Value::Object(obj)
    }

    /// Items of an array-like object in index order; empty for anything else.
    ///
    /// Only index properties actually present below `length` are visited,
    /// so the work is bounded by the object's size whatever `length` claims.
    /// Holes are skipped.
    pub fn array_items(&self) -> Vec<Value> {
        let Value::Object(obj) = self else {
            return Vec::new();
        };
        let Some(len) = obj.get("length").as_number() else {
            return Vec::new();
        };
        if !(len.is_finite() && len >= 0.0) {
            return Vec::new();
        }
        let mut indices: Vec<u64> = obj
            .keys()
            .iter()
            .filter_map(|key| key.parse::<u64>().ok().filter(|i| i.to_string() == *key))
            .filter(|&i| (i as f64) < len)
            .collect();
        indices.sort_unstable();
        indices.into_iter().map(|i| obj.get(&i.to_string())).collect()
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn function(
        name: impl Into<String>,
        call: impl Fn(&[Value]) -> Result<Value, ScriptError> + Send + Sync + 'static,
    ) -> Self {
        Value::Function(Function::new(name, call))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Undefined => TypeTag::Undefined,
            Value::Null => TypeTag::Null,
            Value::Bool(_) => TypeTag::Bool,
            Value::Number(_) => TypeTag::Number,
            Value::String(_) => TypeTag::String,
            Value::Object(_) => TypeTag::Object,
            Value::Function(_) => TypeTag::Function,
            Value::Element(_) => TypeTag::Element,
            Value::Style(_) => TypeTag::Style,
            Value::Document(_) => TypeTag::Document,
            Value::RegExp(_) => TypeTag::RegExp,
        }
    }

    /// Identity of a reference value; `None` for primitives.
    pub fn identity(&self) -> Option<ObjectId> {
        match self {
            Value::Object(o) => Some(o.id()),
            Value::Function(f) => Some(f.id()),
            Value::Element(e) => Some(e.id()),
            Value::Style(s) => Some(s.id()),
            Value::Document(d) => Some(d.id()),
            Value::RegExp(r) => Some(r.id()),
            _ => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        self.identity().is_none()
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&ElementRef> {
        match self {
            Value::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Property read that treats non-objects as empty.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(o) => o.get(key),
            _ => Value::Undefined,
        }
    }

    /// String form used by the console substitute.
    pub fn display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 => {
                format!("{}", *n as i64)
            }
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(f) => format!("function {}()", f.name()),
            Value::Element(e) => format!("<{}>", e.tag_name()),
            Value::Style(s) => s.css_text(),
            Value::Document(_) => "[object Document]".to_string(),
            Value::RegExp(r) => format!("/{}/", r.source()),
        }
    }

    /// Reference equality for reference values, value equality for primitives.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => match (self, other) {
                (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::Number(a), Value::Number(b)) => a == b,
                (Value::String(a), Value::String(b)) => a == b,
                _ => false,
            },
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<ElementRef> for Value {
    fn from(e: ElementRef) -> Self {
        Value::Element(e)
    }
}
