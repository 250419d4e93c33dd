//! Tests of the binding layer against a scripted engine.
//!
//! The scripted engine records every boundary call, which lets these tests
//! check what does and does not reach the engine.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use wasm_bind_common::BindError;
use wasm_bind_core::{
    EngineBoundary, ExportSink, Handle, HandleState, Instance, Module, SharedEngine, Value,
};

#[derive(Clone, Copy)]
enum Scripted {
    Function,
    Memory,
}

/// Engine whose instances export a fixed list and whose calls echo their
/// arguments.
struct ScriptedEngine {
    exports: Vec<(&'static str, Scripted)>,
    call_delay: Duration,
    next: AtomicU64,
    live: Mutex<HashSet<Handle>>,
    memory: Mutex<Vec<u8>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    fn new(exports: Vec<(&'static str, Scripted)>) -> Self {
        Self {
            exports,
            call_delay: Duration::ZERO,
            next: AtomicU64::new(1),
            live: Mutex::new(HashSet::new()),
            memory: Mutex::new(vec![0; 65_536]),
            log: Mutex::new(Vec::new()),
        }
    }

    fn handle(&self) -> Handle {
        let handle = Handle::new(self.next.fetch_add(1, Ordering::Relaxed)).unwrap();
        self.live.lock().insert(handle);
        handle
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().push(entry.into());
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn live(&self) -> usize {
        self.live.lock().len()
    }
}

impl EngineBoundary for ScriptedEngine {
    fn validate(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(b"\0asm")
    }

    fn compile(&self, _bytes: &[u8]) -> Result<Handle, BindError> {
        self.record("compile");
        Ok(self.handle())
    }

    fn deserialize_module(&self, _bytes: &[u8]) -> Result<Handle, BindError> {
        self.record("deserialize");
        Ok(self.handle())
    }

    fn serialize_module(&self, _module: Handle) -> Result<Vec<u8>, BindError> {
        self.record("serialize");
        Ok(b"artifact".to_vec())
    }

    fn instantiate(
        &self,
        _module: Handle,
        sink: &mut dyn ExportSink,
    ) -> Result<Handle, BindError> {
        self.record("instantiate");
        let instance = self.handle();
        let memory = self.handle();

        for (name, kind) in &self.exports {
            let pushed = match kind {
                Scripted::Function => sink.on_function_export(name),
                Scripted::Memory => sink.on_memory_export(name, memory),
            };
            if let Err(e) = pushed {
                self.live.lock().retain(|h| *h != instance && *h != memory);
                return Err(e);
            }
        }

        Ok(instance)
    }

    fn call(&self, _instance: Handle, name: &str, args: &[Value]) -> Result<Vec<Value>, BindError> {
        self.record(format!("call {name} start"));
        thread::sleep(self.call_delay);
        self.record(format!("call {name} end"));
        Ok(args.to_vec())
    }

    fn memory_view(
        &self,
        _memory: Handle,
        visit: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), BindError> {
        visit(self.memory.lock().as_mut_slice());
        Ok(())
    }

    fn memory_grow(&self, _memory: Handle, pages: u32) -> Result<u32, BindError> {
        let mut memory = self.memory.lock();
        let previous = memory.len() / 65_536;
        let new_len = memory.len() + pages as usize * 65_536;
        memory.resize(new_len, 0);
        Ok(previous as u32)
    }

    fn release(&self, handle: Handle) {
        self.record(format!("release {handle}"));
        self.live.lock().remove(&handle);
    }
}

const WASM: &[u8] = b"\0asm\x01\0\0\0";

fn scripted(exports: Vec<(&'static str, Scripted)>) -> (Arc<ScriptedEngine>, SharedEngine) {
    let scripted = Arc::new(ScriptedEngine::new(exports));
    let engine: SharedEngine = scripted.clone();
    (scripted, engine)
}

#[test]
fn test_call_after_close_never_reaches_engine() {
    let (scripted, engine) = scripted(vec![("echo", Scripted::Function)]);
    let instance = Instance::from_bytes(&engine, WASM).unwrap();
    let echo = instance.get_function("echo").unwrap().unwrap().clone();

    assert_eq!(echo.apply(&[Value::I64(7)]).unwrap(), [Value::I64(7)]);
    instance.close();

    let before = scripted.log();
    let err = echo.apply(&[Value::I64(7)]).unwrap_err();
    assert!(matches!(err, BindError::IllegalState { .. }));
    assert_eq!(scripted.log(), before);
}

#[test]
fn test_duplicate_export_aborts_instantiation() {
    let (scripted, engine) = scripted(vec![
        ("run", Scripted::Function),
        ("run", Scripted::Memory),
    ]);
    let module = Module::compile(&engine, WASM).unwrap();

    let err = module.instantiate().unwrap_err();
    assert!(matches!(err, BindError::Instantiate { .. }));
    assert!(err.to_string().contains("duplicate export name `run`"));

    // Only the module is left
    assert_eq!(scripted.live(), 1);
}

#[test]
fn test_close_waits_for_call_in_flight() {
    let mut scripted = ScriptedEngine::new(vec![("slow", Scripted::Function)]);
    scripted.call_delay = Duration::from_millis(100);
    let scripted = Arc::new(scripted);
    let engine: SharedEngine = scripted.clone();

    let instance = Instance::from_bytes(&engine, WASM).unwrap();
    let slow = instance.get_function("slow").unwrap().unwrap().clone();

    let caller = thread::spawn(move || slow.apply(&[]));
    while !scripted.log().iter().any(|e| e == "call slow start") {
        thread::sleep(Duration::from_millis(1));
    }

    instance.close();
    assert!(caller.join().unwrap().is_ok());

    let log = scripted.log();
    let end = log.iter().position(|e| e == "call slow end").unwrap();
    let release = log.iter().rposition(|e| e.starts_with("release")).unwrap();
    assert!(end < release, "{log:?}");
}

#[test]
fn test_memory_through_boundary() {
    let (_scripted, engine) = scripted(vec![("memory", Scripted::Memory)]);
    let instance = Instance::from_bytes(&engine, WASM).unwrap();
    let memory = instance.get_memory("memory").unwrap().unwrap();

    let view = memory.buffer().unwrap();
    view.write(10, b"abc").unwrap();
    assert_eq!(view.copy_to_vec(10, 3).unwrap(), b"abc");

    assert_eq!(memory.grow(2).unwrap(), 1);
    assert_eq!(memory.size_pages().unwrap(), 3);
    assert!(view.is_stale());
    assert_eq!(memory.buffer().unwrap().copy_to_vec(10, 3).unwrap(), b"abc");

    instance.close();
}

#[test]
fn test_handles_released_exactly_once() {
    let (scripted, engine) = scripted(vec![("f", Scripted::Function)]);

    let module = Module::compile(&engine, WASM).unwrap();
    let instance = module.instantiate().unwrap();
    module.close();
    module.close();
    instance.close();
    drop(instance);
    drop(module);

    let releases = scripted
        .log()
        .iter()
        .filter(|e| e.starts_with("release"))
        .count();
    assert_eq!(releases, 2);
}

#[test]
fn test_dropped_module_is_released() {
    let (scripted, engine) = scripted(Vec::new());

    {
        let module = Module::compile(&engine, WASM).unwrap();
        assert_eq!(module.state(), HandleState::Live);
    }

    assert_eq!(scripted.live(), 0);
}

#[test]
fn test_serialize_goes_through_engine() {
    let (scripted, engine) = scripted(Vec::new());
    let module = Module::compile(&engine, WASM).unwrap();

    assert_eq!(module.serialize().unwrap(), b"artifact");
    let restored = Module::deserialize(&engine, b"artifact").unwrap();

    assert_eq!(restored.state(), HandleState::Live);
    assert!(scripted.log().contains(&"deserialize".to_string()));
}
