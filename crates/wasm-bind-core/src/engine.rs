//! Wasmtime-backed execution engine.
//!
//! [`WasmEngine`] implements [`EngineBoundary`] on top of Wasmtime. It keeps
//! three handle tables:
//! - compiled modules
//! - instances, each with its own [`Store`] behind a mutex
//! - exported memories, each pointing back at its instance
//!
//! [`default_engine`] lazily creates one process-wide engine with the default
//! configuration.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};
use wasmtime::{
    Config, Engine, ExternType, InstanceAllocationStrategy, Linker, Memory, Module,
    PoolingAllocationConfig, Store, StoreLimits, StoreLimitsBuilder, Val, ValType,
};

use wasm_bind_common::{BindError, EngineConfig, OptLevel};

use crate::artifact;
use crate::boundary::{EngineBoundary, ExportSink, Handle, SharedEngine};
use crate::Value;

/// Wasmtime implementation of the engine boundary.
///
/// Every handle this engine returns is unique for its lifetime, across all
/// three tables. Calls on one instance are serialized by that instance's
/// store mutex; different instances run in parallel.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use wasm_bind_common::EngineConfig;
/// use wasm_bind_core::{Module, SharedEngine, WasmEngine};
///
/// let engine: SharedEngine = Arc::new(WasmEngine::new(&EngineConfig::default())?);
/// let module = Module::compile(&engine, &wasm_bytes)?;
/// ```
pub struct WasmEngine {
    engine: Engine,
    linker: Linker<StoreLimits>,
    config: EngineConfig,
    /// Hash of the engine settings that affect compiled code.
    fingerprint: u64,
    next_handle: AtomicU64,
    modules: DashMap<Handle, Module>,
    instances: DashMap<Handle, Arc<Mutex<InstanceSlot>>>,
    memories: DashMap<Handle, MemorySlot>,
}

/// Engine-side state of one instance.
struct InstanceSlot {
    store: Store<StoreLimits>,
    instance: wasmtime::Instance,
    memories: Vec<Handle>,
}

#[derive(Clone, Copy)]
struct MemorySlot {
    instance: Handle,
    memory: Memory,
}

impl WasmEngine {
    /// Create a new engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `Init` if the Wasmtime configuration is rejected (for example
    /// the pooling allocator cannot reserve its memory).
    pub fn new(config: &EngineConfig) -> Result<Self, BindError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.cranelift_opt_level(match config.opt_level {
            OptLevel::None => wasmtime::OptLevel::None,
            OptLevel::Speed => wasmtime::OptLevel::Speed,
            OptLevel::SpeedAndSize => wasmtime::OptLevel::SpeedAndSize,
        });
        wasmtime_config.parallel_compilation(config.parallel_compilation);

        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| BindError::init(format!("{e:#}")))?;

        let fingerprint = {
            let mut hasher = DefaultHasher::new();
            engine.precompile_compatibility_hash().hash(&mut hasher);
            config.opt_level.hash(&mut hasher);
            hasher.finish()
        };

        info!(
            fingerprint = %format_args!("{fingerprint:016x}"),
            "Wasmtime engine initialized"
        );

        Ok(Self {
            linker: Linker::new(&engine),
            engine,
            config: config.clone(),
            fingerprint,
            next_handle: AtomicU64::new(0),
            modules: DashMap::new(),
            instances: DashMap::new(),
            memories: DashMap::new(),
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        // Maximum size of a single memory in bytes
        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of handles (modules, instances, memories) not yet released.
    pub fn live_handles(&self) -> usize {
        self.modules.len() + self.instances.len() + self.memories.len()
    }

    fn allocate_handle(&self) -> Handle {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        Handle::from(std::num::NonZeroU64::MIN.saturating_add(raw))
    }

    fn store_limits(&self) -> StoreLimits {
        let mut limits = StoreLimitsBuilder::new();
        if let Some(bytes) = self.config.max_memory_bytes() {
            limits = limits.memory_size(bytes);
        }
        limits.build()
    }

    fn module(&self, handle: Handle) -> Result<Module, BindError> {
        self.modules
            .get(&handle)
            .map(|module| module.clone())
            .ok_or_else(|| BindError::illegal_state(format!("unknown module handle {handle}")))
    }

    fn instance_slot(&self, handle: Handle) -> Result<Arc<Mutex<InstanceSlot>>, BindError> {
        self.instances
            .get(&handle)
            .map(|slot| Arc::clone(&slot))
            .ok_or_else(|| BindError::illegal_state(format!("unknown instance handle {handle}")))
    }

    fn memory_slot(&self, handle: Handle) -> Result<MemorySlot, BindError> {
        self.memories
            .get(&handle)
            .map(|slot| *slot)
            .ok_or_else(|| BindError::illegal_state(format!("unknown memory handle {handle}")))
    }

    /// Report every function and memory export of `module` to `sink`.
    ///
    /// Memory handles are recorded in `slot.memories` as soon as they are created,
    /// so the caller can release them if a later export is rejected.
    fn register_exports(
        &self,
        module: &Module,
        slot: &mut InstanceSlot,
        instance_handle: Handle,
        sink: &mut dyn ExportSink,
    ) -> Result<(), BindError> {
        for export in module.exports() {
            let name = export.name();
            match export.ty() {
                ExternType::Func(_) => sink.on_function_export(name)?,
                ExternType::Memory(_) => {
                    let Some(memory) = slot.instance.get_memory(&mut slot.store, name) else {
                        debug!(export = name, "Skipping memory export not backed by a core memory");
                        continue;
                    };
                    let memory_handle = self.allocate_handle();
                    self.memories.insert(
                        memory_handle,
                        MemorySlot {
                            instance: instance_handle,
                            memory,
                        },
                    );
                    slot.memories.push(memory_handle);
                    sink.on_memory_export(name, memory_handle)?;
                }
                _ => debug!(export = name, "Skipping unsupported export kind"),
            }
        }

        Ok(())
    }
}

impl EngineBoundary for WasmEngine {
    fn validate(&self, bytes: &[u8]) -> bool {
        match Module::validate(&self.engine, bytes) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %format!("{e:#}"), "Module failed validation");
                false
            }
        }
    }

    fn compile(&self, bytes: &[u8]) -> Result<Handle, BindError> {
        let module =
            Module::new(&self.engine, bytes).map_err(|e| BindError::compile(format!("{e:#}")))?;

        let handle = self.allocate_handle();
        self.modules.insert(handle, module);
        Ok(handle)
    }

    #[allow(unsafe_code)]
    fn deserialize_module(&self, bytes: &[u8]) -> Result<Handle, BindError> {
        let payload = artifact::decode(bytes, self.fingerprint)?;

        // SAFETY: the envelope only guards against accidental damage and
        // artifacts from another engine build; it is not tamper-proof. Callers
        // of `Module::deserialize` must only pass artifacts from a trusted source.
        let module = unsafe { Module::deserialize(&self.engine, payload) }
            .map_err(|e| BindError::deserialize(format!("{e:#}")))?;

        let handle = self.allocate_handle();
        self.modules.insert(handle, module);
        Ok(handle)
    }

    fn serialize_module(&self, module: Handle) -> Result<Vec<u8>, BindError> {
        let payload = self
            .module(module)?
            .serialize()
            .map_err(|e| BindError::serialize(format!("{e:#}")))?;

        Ok(artifact::encode(self.fingerprint, &payload))
    }

    fn instantiate(
        &self,
        module: Handle,
        sink: &mut dyn ExportSink,
    ) -> Result<Handle, BindError> {
        let module = self.module(module)?;

        let mut store = Store::new(&self.engine, self.store_limits());
        store.limiter(|limits| limits);

        let instance = self
            .linker
            .instantiate(&mut store, &module)
            .map_err(|e| BindError::instantiate(format!("{e:#}")))?;

        let mut slot = InstanceSlot {
            store,
            instance,
            memories: Vec::new(),
        };
        let handle = self.allocate_handle();

        if let Err(e) = self.register_exports(&module, &mut slot, handle, sink) {
            for memory in &slot.memories {
                self.memories.remove(memory);
            }
            return Err(e);
        }

        self.instances.insert(handle, Arc::new(Mutex::new(slot)));
        Ok(handle)
    }

    fn call(&self, instance: Handle, name: &str, args: &[Value]) -> Result<Vec<Value>, BindError> {
        let slot = self.instance_slot(instance)?;
        let mut slot = slot.lock();
        let InstanceSlot {
            store, instance, ..
        } = &mut *slot;

        let func = instance
            .get_func(&mut *store, name)
            .ok_or_else(|| BindError::call(name, "no exported function with this name"))?;

        let params: Vec<Val> = args.iter().copied().map(to_val).collect();
        let mut results = func
            .ty(&*store)
            .results()
            .map(|ty| placeholder(&ty).ok_or_else(|| unsupported_type(name, &ty)))
            .collect::<Result<Vec<_>, _>>()?;

        func.call(&mut *store, &params, &mut results)
            .map_err(|e| BindError::call(name, format!("{e:#}")))?;

        results.iter().map(|val| from_val(name, val)).collect()
    }

    fn memory_view(
        &self,
        memory: Handle,
        visit: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), BindError> {
        let MemorySlot { instance, memory } = self.memory_slot(memory)?;
        let slot = self.instance_slot(instance)?;
        let mut slot = slot.lock();

        visit(memory.data_mut(&mut slot.store));
        Ok(())
    }

    fn memory_grow(&self, memory: Handle, pages: u32) -> Result<u32, BindError> {
        let MemorySlot { instance, memory } = self.memory_slot(memory)?;
        let slot = self.instance_slot(instance)?;
        let mut slot = slot.lock();

        let previous = memory
            .grow(&mut slot.store, u64::from(pages))
            .map_err(|e| BindError::grow(format!("{e:#}")))?;

        u32::try_from(previous)
            .map_err(|_| BindError::grow(format!("previous page count {previous} exceeds u32")))
    }

    fn release(&self, handle: Handle) {
        if self.modules.remove(&handle).is_some() {
            debug!(handle = %handle, "Module released");
            return;
        }

        if let Some((_, slot)) = self.instances.remove(&handle) {
            for memory in &slot.lock().memories {
                self.memories.remove(memory);
            }
            debug!(handle = %handle, "Instance released");
            return;
        }

        if self.memories.remove(&handle).is_some() {
            debug!(handle = %handle, "Memory released");
        }
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("opt_level", &self.config.opt_level)
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("modules", &self.modules.len())
            .field("instances", &self.instances.len())
            .finish_non_exhaustive()
    }
}

/// The process-wide engine with default configuration.
///
/// Created on first use. If creation fails, every call reports the same
/// `Init` error.
pub fn default_engine() -> Result<SharedEngine, BindError> {
    static DEFAULT_ENGINE: OnceLock<Result<SharedEngine, BindError>> = OnceLock::new();

    DEFAULT_ENGINE
        .get_or_init(|| {
            WasmEngine::new(&EngineConfig::default())
                .map(|engine| Arc::new(engine) as SharedEngine)
        })
        .clone()
}

fn to_val(value: Value) -> Val {
    match value {
        Value::I32(v) => Val::I32(v),
        Value::I64(v) => Val::I64(v),
        Value::F32(v) => Val::F32(v.to_bits()),
        Value::F64(v) => Val::F64(v.to_bits()),
    }
}

fn from_val(function: &str, val: &Val) -> Result<Value, BindError> {
    match val {
        Val::I32(v) => Ok(Value::I32(*v)),
        Val::I64(v) => Ok(Value::I64(*v)),
        Val::F32(bits) => Ok(Value::F32(f32::from_bits(*bits))),
        Val::F64(bits) => Ok(Value::F64(f64::from_bits(*bits))),
        _ => Err(BindError::call(
            function,
            "function returned a value of an unsupported type",
        )),
    }
}

/// Result slot for a value of type `ty`, if the type is supported.
fn placeholder(ty: &ValType) -> Option<Val> {
    match ty {
        ValType::I32 => Some(Val::I32(0)),
        ValType::I64 => Some(Val::I64(0)),
        ValType::F32 => Some(Val::F32(0)),
        ValType::F64 => Some(Val::F64(0)),
        _ => None,
    }
}

fn unsupported_type(function: &str, ty: &ValType) -> BindError {
    BindError::call(function, format!("unsupported result type {ty:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig::default()).unwrap()
    }

    fn wasm(wat: &str) -> Vec<u8> {
        wat::parse_str(wat).unwrap()
    }

    struct Collect(Vec<(String, Option<Handle>)>);

    impl ExportSink for Collect {
        fn on_function_export(&mut self, name: &str) -> Result<(), BindError> {
            self.0.push((name.to_string(), None));
            Ok(())
        }

        fn on_memory_export(&mut self, name: &str, memory: Handle) -> Result<(), BindError> {
            self.0.push((name.to_string(), Some(memory)));
            Ok(())
        }
    }

    #[test]
    fn test_engine_creation_default() {
        let engine = engine();
        assert!(!engine.config().pooling_allocator);
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn test_engine_creation_pooling() {
        let config = EngineConfig {
            pooling_allocator: true,
            max_instances: 4,
            instance_memory_mb: 4,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config);

        assert!(engine.is_ok());
        assert!(engine.unwrap().config().pooling_allocator);
    }

    #[test]
    fn test_handles_are_unique_and_non_zero() {
        let engine = engine();
        let a = engine.allocate_handle();
        let b = engine.allocate_handle();

        assert_ne!(a, b);
        assert_eq!(a.get(), 1);
    }

    #[test]
    fn test_value_conversion() {
        for value in [
            Value::I32(-1),
            Value::I64(i64::MAX),
            Value::F32(1.5),
            Value::F64(-2.25),
        ] {
            assert_eq!(from_val("f", &to_val(value)).unwrap(), value);
        }
    }

    #[test]
    fn test_instantiate_reports_exports_skipping_globals() {
        let engine = engine();
        let module = engine
            .compile(&wasm(
                r#"(module
                    (memory (export "mem") 1)
                    (global (export "g") i32 (i32.const 0))
                    (func (export "f")))"#,
            ))
            .unwrap();

        let mut sink = Collect(Vec::new());
        let instance = engine.instantiate(module, &mut sink).unwrap();

        sink.0.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(sink.0.len(), 2);
        assert_eq!(sink.0[0].0, "f");
        assert!(sink.0[0].1.is_none());
        assert_eq!(sink.0[1].0, "mem");
        assert!(sink.0[1].1.is_some());

        // module + instance + memory
        assert_eq!(engine.live_handles(), 3);
        engine.release(instance);
        assert_eq!(engine.live_handles(), 1);
        engine.release(module);
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn test_release_unknown_handle_is_ignored() {
        let engine = engine();
        engine.release(Handle::new(999).unwrap());
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn test_unknown_handles_are_illegal_state() {
        let engine = engine();
        let handle = Handle::new(42).unwrap();

        assert!(matches!(
            engine.call(handle, "f", &[]),
            Err(BindError::IllegalState { .. })
        ));
        assert!(matches!(
            engine.memory_grow(handle, 1),
            Err(BindError::IllegalState { .. })
        ));
        assert!(matches!(
            engine.serialize_module(handle),
            Err(BindError::IllegalState { .. })
        ));
    }

    #[test]
    fn test_engine_debug() {
        let engine = engine();

        let debug_str = format!("{engine:?}");
        assert!(debug_str.contains("WasmEngine"));
        assert!(debug_str.contains("pooling_allocator"));
    }

    #[test]
    fn test_default_engine_is_shared() {
        let a = default_engine().unwrap();
        let b = default_engine().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
