//! The export registry of an instance.
//!
//! [`Exports`] maps export names to [`Export`] values. It is filled once, by
//! the engine, while the instance is being created (see [`ExportsBuilder`])
//! and is read-only afterwards.
//!
//! Lookups distinguish "absent" from "wrong kind":
//!
//! ```ignore
//! // Absent name: Ok(None)
//! assert!(exports.get_function("missing")?.is_none());
//!
//! // Present, but a memory: Err(BindError::TypeMismatch { .. })
//! assert!(exports.get_function("memory").is_err());
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Weak;

use tracing::debug;
use wasm_bind_common::BindError;

use crate::boundary::{ExportSink, Handle};
use crate::instance::InstanceInner;
use crate::{Function, Memory};

/// The kind of an [`Export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportKind {
    Function,
    Memory,
}

impl ExportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportKind::Function => "function",
            ExportKind::Memory => "memory",
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named capability exposed by an instance.
#[derive(Debug, Clone)]
pub enum Export {
    /// An exported function.
    Function(Function),
    /// An exported linear memory.
    Memory(Memory),
}

impl Export {
    pub fn kind(&self) -> ExportKind {
        match self {
            Export::Function(_) => ExportKind::Function,
            Export::Memory(_) => ExportKind::Memory,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Export::Function(function) => function.name(),
            Export::Memory(memory) => memory.name(),
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Export::Function(function) => Some(function),
            Export::Memory(_) => None,
        }
    }

    pub fn as_memory(&self) -> Option<&Memory> {
        match self {
            Export::Memory(memory) => Some(memory),
            Export::Function(_) => None,
        }
    }
}

/// Name-keyed exports of one instance.
pub struct Exports {
    map: HashMap<String, Export>,
}

impl Exports {
    /// The export named `name`, if any.
    pub fn get(&self, name: &str) -> Option<&Export> {
        self.map.get(name)
    }

    /// The function export named `name`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if `name` is exported but is not a function.
    /// An absent name is `Ok(None)`.
    pub fn get_function(&self, name: &str) -> Result<Option<&Function>, BindError> {
        match self.map.get(name) {
            None => Ok(None),
            Some(Export::Function(function)) => Ok(Some(function)),
            Some(other) => Err(mismatch(name, ExportKind::Function, other)),
        }
    }

    /// The memory export named `name`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if `name` is exported but is not a memory.
    /// An absent name is `Ok(None)`.
    pub fn get_memory(&self, name: &str) -> Result<Option<&Memory>, BindError> {
        match self.map.get(name) {
            None => Ok(None),
            Some(Export::Memory(memory)) => Ok(Some(memory)),
            Some(other) => Err(mismatch(name, ExportKind::Memory, other)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate over all exports in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Export)> {
        self.map.iter().map(|(name, export)| (name.as_str(), export))
    }

    /// Export names in unspecified order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.map.iter().map(|(name, export)| (name, export.kind())))
            .finish()
    }
}

fn mismatch(name: &str, expected: ExportKind, found: &Export) -> BindError {
    BindError::type_mismatch(name, expected.as_str(), found.kind().as_str())
}

/// Collects exports pushed by the engine during instantiation.
pub(crate) struct ExportsBuilder {
    instance: Weak<InstanceInner>,
    map: HashMap<String, Export>,
}

impl ExportsBuilder {
    /// Start an empty registry whose exports route through `instance`.
    pub(crate) fn new(instance: Weak<InstanceInner>) -> Self {
        Self {
            instance,
            map: HashMap::new(),
        }
    }

    pub(crate) fn finish(self) -> Exports {
        Exports { map: self.map }
    }

    fn insert(&mut self, name: &str, export: Export) -> Result<(), BindError> {
        match self.map.entry(name.to_string()) {
            Entry::Occupied(_) => Err(BindError::instantiate(format!(
                "duplicate export name `{name}`"
            ))),
            Entry::Vacant(slot) => {
                debug!(export = name, kind = %export.kind(), "Export registered");
                slot.insert(export);
                Ok(())
            }
        }
    }
}

impl ExportSink for ExportsBuilder {
    fn on_function_export(&mut self, name: &str) -> Result<(), BindError> {
        let function = Function::new(name, Weak::clone(&self.instance));
        self.insert(name, Export::Function(function))
    }

    fn on_memory_export(&mut self, name: &str, memory: Handle) -> Result<(), BindError> {
        let memory = Memory::new(name, memory, Weak::clone(&self.instance));
        self.insert(name, Export::Memory(memory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Exports {
        let mut builder = ExportsBuilder::new(Weak::new());
        builder.on_function_export("sum").unwrap();
        builder
            .on_memory_export("memory", Handle::new(1).unwrap())
            .unwrap();
        builder.finish()
    }

    #[test]
    fn test_lookup_by_name() {
        let exports = registry();

        assert_eq!(exports.len(), 2);
        assert!(!exports.is_empty());
        assert!(exports.contains("sum"));
        assert_eq!(exports.get("sum").map(Export::kind), Some(ExportKind::Function));
        assert_eq!(exports.get("memory").map(Export::name), Some("memory"));
        assert!(exports.get("missing").is_none());
    }

    #[test]
    fn test_missing_name_is_none_not_error() {
        let exports = registry();

        assert!(exports.get_function("missing").unwrap().is_none());
        assert!(exports.get_memory("missing").unwrap().is_none());
    }

    #[test]
    fn test_wrong_kind_is_type_mismatch() {
        let exports = registry();

        let err = exports.get_function("memory").unwrap_err();
        assert_eq!(
            err,
            BindError::type_mismatch("memory", "function", "memory")
        );

        let err = exports.get_memory("sum").unwrap_err();
        assert!(matches!(err, BindError::TypeMismatch { .. }));
        assert!(err.is_programmer_error());
    }

    #[test]
    fn test_right_kind_is_returned() {
        let exports = registry();

        let function = exports.get_function("sum").unwrap().unwrap();
        assert_eq!(function.name(), "sum");

        let memory = exports.get_memory("memory").unwrap().unwrap();
        assert_eq!(memory.name(), "memory");
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut builder = ExportsBuilder::new(Weak::new());
        builder.on_function_export("f").unwrap();

        let err = builder
            .on_memory_export("f", Handle::new(2).unwrap())
            .unwrap_err();
        assert!(matches!(err, BindError::Instantiate { .. }));
        assert!(err.to_string().contains("duplicate export name `f`"));

        // The first registration stands
        let exports = builder.finish();
        assert_eq!(exports.get("f").map(Export::kind), Some(ExportKind::Function));
    }

    #[test]
    fn test_names_and_iter() {
        let exports = registry();

        let mut names: Vec<_> = exports.names().collect();
        names.sort_unstable();
        assert_eq!(names, ["memory", "sum"]);

        let kinds: Vec<_> = exports.iter().map(|(_, export)| export.kind()).collect();
        assert_eq!(kinds.len(), 2);
    }

    #[test]
    fn test_debug_lists_kinds() {
        let debug_str = format!("{:?}", registry());
        assert!(debug_str.contains("\"sum\": Function"));
    }
}
