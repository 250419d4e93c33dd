//! Exported functions.

use std::fmt;
use std::sync::Weak;

use tracing::{debug, instrument};
use wasm_bind_common::BindError;

use crate::Value;
use crate::instance::{InstanceInner, upgrade};

/// A callable bound to one export of one instance.
///
/// A `Function` only names its export; the instance it routes through is
/// held weakly, so a `Function` never keeps a closed or dropped instance
/// alive. Cloning is cheap.
#[derive(Clone)]
pub struct Function {
    name: String,
    instance: Weak<InstanceInner>,
}

impl Function {
    pub(crate) fn new(name: &str, instance: Weak<InstanceInner>) -> Self {
        Self {
            name: name.to_string(),
            instance,
        }
    }

    /// The export name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the function.
    ///
    /// Argument count and kinds are checked by the engine against the
    /// function's signature. A function without results returns an empty
    /// `Vec`.
    ///
    /// # Errors
    ///
    /// - `IllegalState` if the instance was closed or dropped; the engine is
    ///   not called in that case
    /// - `Call` on arity or type mismatch, or if execution traps. The
    ///   instance stays usable.
    #[instrument(skip(self, args), fields(function = %self.name, args_len = args.len()))]
    pub fn apply(&self, args: &[Value]) -> Result<Vec<Value>, BindError> {
        let instance = upgrade(&self.instance)?;
        let results =
            instance.with_live(|engine, handle| engine.call(handle, &self.name, args))?;

        debug!(results_len = results.len(), "Function returned");
        Ok(results)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
