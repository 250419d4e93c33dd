//! The contract between the binding layer and the execution engine.
//!
//! The engine is opaque: everything the binding layer knows about a compiled
//! module, a running instance or a linear memory is a [`Handle`]. The
//! [`EngineBoundary`] trait lists every call the binding layer makes; the
//! production implementation is [`crate::WasmEngine`], tests substitute their
//! own.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

use wasm_bind_common::BindError;

use crate::Value;

/// Opaque token identifying an engine-owned resource.
///
/// Handles are never zero, so "no handle" is always representable as
/// `Option<Handle>` without a sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU64);

impl Handle {
    /// Wrap a raw token. Returns `None` for zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// The raw token.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl From<NonZeroU64> for Handle {
    fn from(raw: NonZeroU64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receiver of the exports an engine discovers while instantiating a module.
///
/// The engine pushes one callback per export, synchronously, from inside
/// [`EngineBoundary::instantiate`]. Order is unspecified.
pub trait ExportSink {
    /// An exported function named `name`.
    fn on_function_export(&mut self, name: &str) -> Result<(), BindError>;

    /// An exported linear memory named `name`, reachable through `memory`.
    fn on_memory_export(&mut self, name: &str, memory: Handle) -> Result<(), BindError>;
}

/// Low-level operations offered by an execution engine.
///
/// Every method is a synchronous, potentially blocking call. Implementations
/// must report an unknown handle as [`BindError::IllegalState`] and never
/// panic on one.
pub trait EngineBoundary: Send + Sync {
    /// Check whether `bytes` is a valid module. Never fails.
    fn validate(&self, bytes: &[u8]) -> bool;

    /// Compile `bytes` into a module.
    fn compile(&self, bytes: &[u8]) -> Result<Handle, BindError>;

    /// Load a module from an artifact produced by [`Self::serialize_module`].
    fn deserialize_module(&self, bytes: &[u8]) -> Result<Handle, BindError>;

    /// Serialize a compiled module into a versioned artifact.
    fn serialize_module(&self, module: Handle) -> Result<Vec<u8>, BindError>;

    /// Instantiate `module`, reporting its exports to `sink`.
    ///
    /// If the sink rejects an export, the partially created instance must be
    /// torn down and the sink's error returned.
    fn instantiate(&self, module: Handle, sink: &mut dyn ExportSink)
    -> Result<Handle, BindError>;

    /// Call the exported function `name` of `instance`.
    ///
    /// Arity and type checking against the function signature happen here.
    /// A function without results returns an empty `Vec`.
    fn call(&self, instance: Handle, name: &str, args: &[Value]) -> Result<Vec<Value>, BindError>;

    /// Lend the current contents of `memory` to `visit`.
    ///
    /// The slice covers the whole memory; its length is the current byte length.
    fn memory_view(
        &self,
        memory: Handle,
        visit: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), BindError>;

    /// Grow `memory` by `pages` pages, returning the previous page count.
    fn memory_grow(&self, memory: Handle, pages: u32) -> Result<u32, BindError>;

    /// Release the resource behind `handle`. Unknown handles are ignored.
    ///
    /// Releasing an instance also releases the memories it exported.
    fn release(&self, handle: Handle);
}

/// An engine shared between modules and instances.
pub type SharedEngine = Arc<dyn EngineBoundary>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_rejects_zero() {
        assert!(Handle::new(0).is_none());
        assert_eq!(Handle::new(7).map(Handle::get), Some(7));
    }

    #[test]
    fn test_handle_display() {
        let handle = Handle::new(42).unwrap();
        assert_eq!(handle.to_string(), "#42");
    }
}
