//! Core type definitions for pluma.
//!
//! This crate defines the host-supplied, immutable description of a plugin:
//! - Plugin identifiers
//! - Plugin kind, class and loading strategy
//! - Extension-point declarations carried in plugin metadata
//!
//! Loading, caching and sandboxing live in `pluma-loader` and
//! `pluma-sandbox`; nothing here performs I/O.

mod identity;
mod ids;

pub use identity::{
    DeclaredExposedComponent, DeclaredExtension, ExtensionDeclarations, LoadingStrategy,
    PluginClass, PluginIdentity, PluginKind,
};
pub use ids::PluginId;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid plugin id: {0:?}")]
    InvalidPluginId(String),

    #[error("unknown plugin kind: {0}")]
    UnknownKind(String),
}
