//! WebAssembly module compilation and serialization.
//!
//! This module provides [`Module`], an owned handle to a module compiled by
//! an [`EngineBoundary`](crate::EngineBoundary) implementation.
//!
//! # Compilation Strategies
//!
//! - **JIT**: [`Module::compile`] from Wasm bytes at runtime (slower cold start)
//! - **AOT**: [`Module::serialize`] once, then [`Module::deserialize`] (fast cold start)

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, instrument};
use wasm_bind_common::BindError;

use crate::boundary::{Handle, SharedEngine};
use crate::engine::default_engine;
use crate::handle::{HandleState, NativeHandle};
use crate::Instance;

/// A compiled WebAssembly module.
///
/// A module can be instantiated any number of times. Closing it does not
/// affect instances created from it.
///
/// `Module` is `Send + Sync`. [`Self::close`] waits for a serialization or
/// instantiation in flight on another thread.
pub struct Module {
    handle: Mutex<NativeHandle>,
    engine: SharedEngine,

    /// Hash of the bytes the module was built from.
    content_hash: String,
}

impl Module {
    /// Compile a module from WebAssembly bytes.
    ///
    /// # Arguments
    ///
    /// * `engine` - The engine to compile with
    /// * `bytes` - The raw WebAssembly bytes
    ///
    /// # Errors
    ///
    /// Returns `Compile` if the bytes are not a valid module.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn compile(engine: &SharedEngine, bytes: &[u8]) -> Result<Self, BindError> {
        let start = Instant::now();

        validate_wasm_header(bytes)?;
        let handle = engine.compile(bytes)?;

        let content_hash = compute_hash(bytes);
        info!(
            content_hash = %content_hash,
            handle = %handle,
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Ok(Self::live(engine, handle, content_hash))
    }

    /// Compile a module on the default engine.
    ///
    /// # Errors
    ///
    /// Returns `Init` if the default engine cannot be created, otherwise as
    /// [`Self::compile`].
    pub fn new(bytes: &[u8]) -> Result<Self, BindError> {
        Self::compile(&default_engine()?, bytes)
    }

    /// Whether `bytes` form a valid module for `engine`. Never fails.
    pub fn validate(engine: &SharedEngine, bytes: &[u8]) -> bool {
        validate_wasm_header(bytes).is_ok() && engine.validate(bytes)
    }

    /// [`Self::validate`] on the default engine.
    ///
    /// Returns `false` if the default engine cannot be created.
    pub fn validate_bytes(bytes: &[u8]) -> bool {
        default_engine().is_ok_and(|engine| Self::validate(&engine, bytes))
    }

    /// Load a module from an artifact produced by [`Self::serialize`].
    ///
    /// The artifact must come from an engine with the same build and
    /// settings; anything else is refused.
    ///
    /// Only load artifacts from a trusted source. The envelope checksum
    /// catches accidental damage but does not authenticate the payload, and
    /// a crafted artifact is loaded as native code.
    ///
    /// # Errors
    ///
    /// Returns `Deserialize` if the artifact is damaged or incompatible.
    #[instrument(skip(engine, artifact), fields(artifact_len = artifact.len()))]
    pub fn deserialize(engine: &SharedEngine, artifact: &[u8]) -> Result<Self, BindError> {
        let start = Instant::now();

        let handle = engine.deserialize_module(artifact)?;
        let content_hash = compute_hash(artifact);

        debug!(
            content_hash = %content_hash,
            handle = %handle,
            duration_us = start.elapsed().as_micros(),
            "Precompiled module loaded"
        );

        Ok(Self::live(engine, handle, content_hash))
    }

    fn live(engine: &SharedEngine, handle: Handle, content_hash: String) -> Self {
        Self {
            handle: Mutex::new(NativeHandle::live(engine.clone(), "module", handle)),
            engine: engine.clone(),
            content_hash,
        }
    }

    /// Serialize the compiled module for AOT caching.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the module is closed, or `Serialize`.
    pub fn serialize(&self) -> Result<Vec<u8>, BindError> {
        let native = self.handle.lock();
        let artifact = self.engine.serialize_module(native.get()?)?;
        debug!(artifact_len = artifact.len(), "Module serialized");
        Ok(artifact)
    }

    /// Create a new instance of this module.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the module is closed, or `Instantiate` if
    /// the module has unsatisfied imports, its start function traps, or its
    /// memory exceeds the configured limit.
    pub fn instantiate(&self) -> Result<Instance, BindError> {
        let native = self.handle.lock();
        Instance::instantiate(&self.engine, native.get()?)
    }

    /// Release the module. Idempotent.
    pub fn close(&self) {
        if self.handle.lock().release() {
            debug!(content_hash = %self.content_hash, "Module closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == HandleState::Released
    }

    pub fn state(&self) -> HandleState {
        self.handle.lock().state()
    }

    /// Hash of the bytes the module was compiled or deserialized from.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// The engine that owns the module.
    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("content_hash", &self.content_hash)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Validate WebAssembly header (magic number).
fn validate_wasm_header(bytes: &[u8]) -> Result<(), BindError> {
    if bytes.len() < 8 {
        return Err(BindError::compile("Invalid Wasm: file too small"));
    }

    // Check magic number: \0asm
    if &bytes[0..4] != b"\0asm" {
        return Err(BindError::compile("Invalid Wasm: bad magic number"));
    }

    Ok(())
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
