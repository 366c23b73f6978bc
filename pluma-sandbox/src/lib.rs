//! Capability-mediated execution sandbox for pluma plugins.
//!
//! Untrusted plugin code runs in a [`Realm`] whose only links to the host are
//! a fixed set of endowed globals and the [`Membrane`]. Every host value that
//! crosses in is looked up in the plugin's [`DistortionTable`] and handed over
//! as a typed [`Capability`]:
//!
//! - DOM elements outside the plugin's own fragment become disposable mocks
//! - dialogs and `console` are swapped for inert, plugin-scoped substitutes
//! - style objects stay live so in-place mutation is visible on both sides
//! - `define` dependencies resolve against a [`DependencyAllowList`], never the network
//!
//! The sandbox does not parse JavaScript. A [`ScriptEngine`] implementation
//! drives evaluation against the realm.

mod allowlist;
mod capability;
mod distortion;
mod dom;
mod engine;
mod environment;
mod error;
mod membrane;
mod module;
mod realm;
mod session;
mod value;

pub use allowlist::{DependencyAllowList, SHARED_DEPENDENCY_PREFIX};
pub use capability::{
    Capability, DocumentCapability, ElementCapability, FunctionCapability, ObjectCapability,
    StyleCapability,
};
pub use distortion::{
    Distortion, DistortionEntry, DistortionTable, ElementDistortion, LiveDistortion,
    RegExpDistortion,
};
pub use dom::{
    Document, DocumentRef, Element, ElementRef, SANDBOX_ATTRIBUTE, StyleDeclaration, StyleRef,
};
pub use engine::ScriptEngine;
pub use environment::{ENDOWED_GLOBALS, HostEnvironment, LocationInfo};
pub use error::{EvaluationPhase, SandboxError};
pub use membrane::{Membrane, MembraneMode};
pub use module::{ISOLATED_DEFINE, ModuleFormat, ModuleSource};
pub use realm::Realm;
pub use session::{SandboxRegistry, SandboxSession, evaluate_unsandboxed};
pub use value::{
    Function, FunctionRef, NativeFn, Object, ObjectId, ObjectRef, RegExp, RegExpRef, ScriptError,
    TypeTag, Value,
};
