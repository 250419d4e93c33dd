//! Instantiated modules.
//!
//! An [`Instance`] owns one engine instance handle and the registry of its
//! exports. Exports route every call through the instance's shared inner
//! state, which serializes them:
//!
//! ```text
//! Instance ──Arc──▶ InstanceInner { Mutex<NativeHandle> } ◀──Weak── Function / Memory
//! ```
//!
//! # Concurrency
//!
//! `Instance`, [`Function`] and [`Memory`] are `Send + Sync`. Operations on
//! one instance run one at a time: each holds the instance lock for its whole
//! duration. Distinct instances do not contend.
//!
//! [`Instance::close`] takes the same lock, so closing while a call is in
//! flight waits for that call to finish; every operation that starts after
//! the close fails with `IllegalState` without reaching the engine.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{info, instrument};
use wasm_bind_common::BindError;

use crate::boundary::{EngineBoundary, Handle, SharedEngine};
use crate::engine::default_engine;
use crate::exports::{Exports, ExportsBuilder};
use crate::handle::{HandleState, NativeHandle};
use crate::{Function, Memory, Module};

/// State shared between an instance and its exports.
pub(crate) struct InstanceInner {
    handle: Mutex<NativeHandle>,
}

impl InstanceInner {
    /// Run `op` with the live instance handle, holding the instance lock.
    pub(crate) fn with_live<R>(
        &self,
        op: impl FnOnce(&dyn EngineBoundary, Handle) -> Result<R, BindError>,
    ) -> Result<R, BindError> {
        let native = self.handle.lock();
        let handle = native.get()?;
        op(native.engine().as_ref(), handle)
    }
}

/// Resolve an export's back-reference to its instance.
pub(crate) fn upgrade(instance: &Weak<InstanceInner>) -> Result<Arc<InstanceInner>, BindError> {
    instance
        .upgrade()
        .ok_or_else(|| BindError::illegal_state("instance has been dropped"))
}

/// A live instance of a [`Module`].
///
/// # Example
///
/// ```ignore
/// use wasm_bind_core::{Instance, Value};
///
/// let instance = Instance::new(&wasm_bytes)?;
/// let sum = instance.get_function("sum")?.expect("exported");
/// assert_eq!(sum.apply(&[Value::I32(1), Value::I32(2)])?, vec![Value::I32(3)]);
/// instance.close();
/// ```
pub struct Instance {
    inner: Arc<InstanceInner>,
    exports: Exports,
}

impl Instance {
    /// Compile and instantiate `bytes` on the default engine.
    ///
    /// # Errors
    ///
    /// Returns `Init`, `Compile` or `Instantiate`.
    pub fn new(bytes: &[u8]) -> Result<Self, BindError> {
        Self::from_bytes(&default_engine()?, bytes)
    }

    /// Compile and instantiate `bytes` on `engine`.
    ///
    /// The intermediate module is released before this returns.
    ///
    /// # Errors
    ///
    /// Returns `Compile` or `Instantiate`.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &SharedEngine, bytes: &[u8]) -> Result<Self, BindError> {
        let module = Module::compile(engine, bytes)?;
        let instance = module.instantiate();
        module.close();
        instance
    }

    #[instrument(skip(engine))]
    pub(crate) fn instantiate(engine: &SharedEngine, module: Handle) -> Result<Self, BindError> {
        let start = Instant::now();

        let inner = Arc::new(InstanceInner {
            handle: Mutex::new(NativeHandle::uninstantiated(Arc::clone(engine), "instance")),
        });

        let mut builder = ExportsBuilder::new(Arc::downgrade(&inner));
        let handle = engine.instantiate(module, &mut builder)?;
        inner.handle.lock().bind(handle)?;
        let exports = builder.finish();

        info!(
            handle = %handle,
            exports = exports.len(),
            duration_ms = start.elapsed().as_millis(),
            "Instance created"
        );

        Ok(Self { inner, exports })
    }

    /// The export registry.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the instance is closed.
    pub fn exports(&self) -> Result<&Exports, BindError> {
        self.inner.handle.lock().get()?;
        Ok(&self.exports)
    }

    /// Shorthand for `exports()?.get_function(name)`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the instance is closed, or `TypeMismatch`
    /// if `name` is not a function.
    pub fn get_function(&self, name: &str) -> Result<Option<&Function>, BindError> {
        self.exports()?.get_function(name)
    }

    /// Shorthand for `exports()?.get_memory(name)`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the instance is closed, or `TypeMismatch`
    /// if `name` is not a memory.
    pub fn get_memory(&self, name: &str) -> Result<Option<&Memory>, BindError> {
        self.exports()?.get_memory(name)
    }

    /// Release the instance. Idempotent.
    ///
    /// Exports obtained earlier stay valid as values but every operation on
    /// them fails with `IllegalState` from now on.
    pub fn close(&self) {
        if self.inner.handle.lock().release() {
            info!("Instance closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == HandleState::Released
    }

    pub fn state(&self) -> HandleState {
        self.inner.handle.lock().state()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("state", &self.state())
            .field("exports", &self.exports)
            .finish()
    }
}
