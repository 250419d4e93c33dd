//! Host bindings for WebAssembly modules.
//!
//! This crate lets a host program load, instantiate and drive WebAssembly
//! modules:
//! - [`Module`]: a compiled module, serializable for AOT caching
//! - [`Instance`]: a live instance and its [`Exports`]
//! - [`Function`]: an exported function, called with [`Value`]s
//! - [`Memory`] / [`MemoryView`]: an exported linear memory
//!
//! Every engine resource is reached through an opaque [`Handle`] issued by
//! an [`EngineBoundary`] implementation. [`WasmEngine`] is the Wasmtime one.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 WasmEngine (EngineBoundary)             │
//! │  (Shared, thread-safe)                                  │
//! │  - Handle tables: modules, instances, memories          │
//! │  - Compilation settings, memory limits                  │
//! └─────────────────────────────────────────────────────────┘
//!                            ▲ handles
//!                            │
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Module                           │
//! │  (Owns one module handle)                               │
//! │  - compile / deserialize / serialize                    │
//! └─────────────────────────────────────────────────────────┘
//!                            │ instantiate
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Instance                          │
//! │  (Owns one instance handle, one call at a time)         │
//! │  - Exports: Function | Memory                           │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod artifact;
pub mod boundary;
pub mod engine;
pub mod exports;
pub mod function;
mod handle;
pub mod instance;
pub mod memory;
pub mod module;
pub mod value;

pub use boundary::{EngineBoundary, ExportSink, Handle, SharedEngine};
pub use engine::{WasmEngine, default_engine};
pub use exports::{Export, ExportKind, Exports};
pub use function::Function;
pub use handle::HandleState;
pub use instance::Instance;
pub use memory::{Memory, MemoryView};
pub use module::Module;
pub use value::{ParseValueError, Value, ValueKind};
pub use wasm_bind_common::BindError;
