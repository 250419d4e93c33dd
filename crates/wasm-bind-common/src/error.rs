//! Error types for wasm-bind.
//!
//! Every failure the binding layer can report is a [`BindError`]. Engine-side
//! failures keep the engine's diagnostic text verbatim after a stable prefix,
//! so callers can match on the prefix without depending on engine wording.

use thiserror::Error;

/// Errors raised by the binding layer.
///
/// The variants fall into three groups:
/// - **Fatal**: [`BindError::Init`], the engine cannot be brought up at all
/// - **Recoverable**: bad input or a failed operation; the object that
///   reported it stays usable
/// - **Programmer errors**: [`BindError::IllegalState`] and
///   [`BindError::TypeMismatch`], the caller broke the API contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// The execution engine could not be initialized.
    #[error("Failed to initialize the engine: {reason}")]
    Init {
        /// Description of the initialization failure.
        reason: String,
    },

    /// The module bytes are malformed or use unsupported features.
    #[error("Failed to compile the module: {reason}")]
    Compile {
        /// Engine diagnostic.
        reason: String,
    },

    /// A serialized module is corrupt or was produced by an incompatible engine.
    #[error("Failed to deserialize the module: {reason}")]
    Deserialize {
        /// Description of why the artifact was rejected.
        reason: String,
    },

    /// The engine could not serialize a compiled module.
    #[error("Failed to serialize the module: {reason}")]
    Serialize {
        /// Engine diagnostic.
        reason: String,
    },

    /// Instantiation failed (unsatisfied imports, start function trap, ...).
    #[error("Failed to instantiate the module: {reason}")]
    Instantiate {
        /// Engine diagnostic.
        reason: String,
    },

    /// A call into an exported function failed.
    ///
    /// Covers arity and type mismatches as well as traps during execution.
    #[error("Failed to call the `{function}` exported function: {reason}")]
    Call {
        /// Name of the exported function.
        function: String,
        /// Engine diagnostic.
        reason: String,
    },

    /// Linear memory could not be grown.
    #[error("Failed to grow the memory: {reason}")]
    Grow {
        /// Engine diagnostic.
        reason: String,
    },

    /// A memory view access fell outside the view's bounds.
    #[error("Memory access out of bounds: offset {offset} + {len} bytes exceeds {size} bytes")]
    MemoryAccess {
        /// Start offset of the access.
        offset: usize,
        /// Number of bytes accessed.
        len: usize,
        /// Byte length of the view.
        size: usize,
    },

    /// An operation was issued against a released or uninstantiated handle,
    /// or through a view invalidated by memory growth.
    #[error("Illegal state: {reason}")]
    IllegalState {
        /// What was misused.
        reason: String,
    },

    /// An export exists under the requested name but has another kind.
    #[error("Export `{name}` is a {found}, not a {expected}")]
    TypeMismatch {
        /// Export name.
        name: String,
        /// Kind the caller asked for.
        expected: &'static str,
        /// Kind actually registered.
        found: &'static str,
    },
}

impl BindError {
    /// Create a new `Init` error.
    pub fn init(reason: impl Into<String>) -> Self {
        Self::Init {
            reason: reason.into(),
        }
    }

    /// Create a new `Compile` error.
    pub fn compile(reason: impl Into<String>) -> Self {
        Self::Compile {
            reason: reason.into(),
        }
    }

    /// Create a new `Deserialize` error.
    pub fn deserialize(reason: impl Into<String>) -> Self {
        Self::Deserialize {
            reason: reason.into(),
        }
    }

    /// Create a new `Serialize` error.
    pub fn serialize(reason: impl Into<String>) -> Self {
        Self::Serialize {
            reason: reason.into(),
        }
    }

    /// Create a new `Instantiate` error.
    pub fn instantiate(reason: impl Into<String>) -> Self {
        Self::Instantiate {
            reason: reason.into(),
        }
    }

    /// Create a new `Call` error.
    pub fn call(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Call {
            function: function.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `Grow` error.
    pub fn grow(reason: impl Into<String>) -> Self {
        Self::Grow {
            reason: reason.into(),
        }
    }

    /// Create a new `IllegalState` error.
    pub fn illegal_state(reason: impl Into<String>) -> Self {
        Self::IllegalState {
            reason: reason.into(),
        }
    }

    /// Create a new `TypeMismatch` error.
    pub fn type_mismatch(
        name: impl Into<String>,
        expected: &'static str,
        found: &'static str,
    ) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected,
            found,
        }
    }

    /// Returns `true` if the caller violated the API contract.
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, Self::IllegalState { .. } | Self::TypeMismatch { .. })
    }

    /// Returns `true` if the failing operation can be retried or the process
    /// can carry on without it.
    pub fn is_recoverable(&self) -> bool {
        !self.is_programmer_error() && !matches!(self, Self::Init { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BindError::compile("Validation error: invalid leading byte");
        assert_eq!(
            err.to_string(),
            "Failed to compile the module: Validation error: invalid leading byte"
        );

        let err = BindError::call("sum", "type mismatch");
        assert_eq!(
            err.to_string(),
            "Failed to call the `sum` exported function: type mismatch"
        );

        let err = BindError::type_mismatch("memory", "function", "memory");
        assert_eq!(err.to_string(), "Export `memory` is a memory, not a function");
    }

    #[test]
    fn test_memory_access_display() {
        let err = BindError::MemoryAccess {
            offset: 10,
            len: 4,
            size: 12,
        };
        assert_eq!(
            err.to_string(),
            "Memory access out of bounds: offset 10 + 4 bytes exceeds 12 bytes"
        );
    }

    #[test]
    fn test_is_programmer_error() {
        assert!(BindError::illegal_state("released").is_programmer_error());
        assert!(BindError::type_mismatch("f", "memory", "function").is_programmer_error());
        assert!(!BindError::grow("limit").is_programmer_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(BindError::compile("bad").is_recoverable());
        assert!(BindError::call("f", "trap").is_recoverable());
        assert!(BindError::grow("limit").is_recoverable());
        assert!(!BindError::init("no engine").is_recoverable());
        assert!(!BindError::illegal_state("released").is_recoverable());
    }
}
