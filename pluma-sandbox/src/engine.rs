//! The script engine seam.
//!
//! The sandbox does not interpret plugin source itself. An engine runs a
//! [`ModuleSource`] against a [`Realm`]: it binds `define` (and the isolated
//! definer name) to [`Realm::define`], reads globals through
//! [`Realm::global`], and may only touch host values through the
//! capabilities those calls return.

use crate::module::ModuleSource;
use crate::realm::Realm;
use crate::value::ScriptError;

pub trait ScriptEngine: Send + Sync {
    /// Evaluates one module. Errors thrown by the script surface as `ScriptError`.
    fn evaluate(&self, module: &ModuleSource, realm: &mut Realm) -> Result<(), ScriptError>;
}

impl<F> ScriptEngine for F
where
    F: Fn(&ModuleSource, &mut Realm) -> Result<(), ScriptError> + Send + Sync,
{
    fn evaluate(&self, module: &ModuleSource, realm: &mut Realm) -> Result<(), ScriptError> {
        self(module, realm)
    }
}
