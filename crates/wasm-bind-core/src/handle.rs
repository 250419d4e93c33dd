//! Ownership of engine handles.
//!
//! A [`NativeHandle`] is the single owner of one engine handle. It moves
//! through `Uninstantiated → Live → Released` and releases the engine
//! resource exactly once, either on an explicit [`NativeHandle::release`] or,
//! as a best-effort backstop, when dropped.

use std::fmt;

use tracing::{debug, warn};
use wasm_bind_common::BindError;

use crate::boundary::{Handle, SharedEngine};

/// Lifecycle state of a module or instance handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// The engine has not handed out a handle yet.
    Uninstantiated,
    /// The handle is valid.
    Live,
    /// The handle has been released; no engine call may use it.
    Released,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleState::Uninstantiated => write!(f, "uninstantiated"),
            HandleState::Live => write!(f, "live"),
            HandleState::Released => write!(f, "released"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Uninstantiated,
    Live(Handle),
    Released,
}

/// Owning wrapper around one engine handle.
pub(crate) struct NativeHandle {
    engine: SharedEngine,
    slot: Slot,
    /// What the handle refers to ("module", "instance"), for diagnostics.
    kind: &'static str,
}

impl NativeHandle {
    /// A slot that will receive its handle later through [`Self::bind`].
    pub(crate) fn uninstantiated(engine: SharedEngine, kind: &'static str) -> Self {
        Self {
            engine,
            slot: Slot::Uninstantiated,
            kind,
        }
    }

    /// A slot that owns `handle` from the start.
    pub(crate) fn live(engine: SharedEngine, kind: &'static str, handle: Handle) -> Self {
        Self {
            engine,
            slot: Slot::Live(handle),
            kind,
        }
    }

    /// Take ownership of `handle`.
    ///
    /// Only valid in the `Uninstantiated` state. On misuse the handle is
    /// released immediately so it cannot leak.
    pub(crate) fn bind(&mut self, handle: Handle) -> Result<(), BindError> {
        if let Slot::Uninstantiated = self.slot {
            self.slot = Slot::Live(handle);
            return Ok(());
        }

        self.engine.release(handle);
        Err(BindError::illegal_state(format!(
            "{} handle is already {}",
            self.kind,
            self.state()
        )))
    }

    /// The live handle, or `IllegalState` if there is none.
    pub(crate) fn get(&self) -> Result<Handle, BindError> {
        match self.slot {
            Slot::Live(handle) => Ok(handle),
            Slot::Uninstantiated => Err(BindError::illegal_state(format!(
                "{} has not been instantiated",
                self.kind
            ))),
            Slot::Released => Err(BindError::illegal_state(format!(
                "{} handle has been released",
                self.kind
            ))),
        }
    }

    pub(crate) fn state(&self) -> HandleState {
        match self.slot {
            Slot::Uninstantiated => HandleState::Uninstantiated,
            Slot::Live(_) => HandleState::Live,
            Slot::Released => HandleState::Released,
        }
    }

    pub(crate) fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// Release the handle. Returns `true` if this call released it.
    ///
    /// Idempotent: later calls are no-ops.
    pub(crate) fn release(&mut self) -> bool {
        match std::mem::replace(&mut self.slot, Slot::Released) {
            Slot::Live(handle) => {
                self.engine.release(handle);
                debug!(kind = self.kind, handle = %handle, "Handle released");
                true
            }
            Slot::Uninstantiated | Slot::Released => false,
        }
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        if let Slot::Live(handle) = self.slot {
            warn!(
                kind = self.kind,
                handle = %handle,
                "Handle released on drop; call `close()` to release it explicitly"
            );
            self.release();
        }
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("kind", &self.kind)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}
