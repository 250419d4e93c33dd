//! Engine configuration.
//!
//! [`EngineConfig`] controls how the execution engine compiles modules and
//! how much linear memory an instance may claim. It is deserializable so it
//! can be embedded in a configuration file (see [`crate::ConfigFile`]).

use serde::{Deserialize, Serialize};

/// Size of a WebAssembly page in bytes.
pub const WASM_PAGE_SIZE: usize = 65_536;

/// Code generation optimization level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    /// No optimizations; fastest compilation.
    None,
    /// Optimize for execution speed.
    #[default]
    Speed,
    /// Optimize for speed and code size.
    SpeedAndSize,
}

/// Execution engine configuration.
///
/// These settings are applied once, when the engine is created, and are
/// shared by every module and instance created from that engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Code generation optimization level.
    #[serde(default)]
    pub opt_level: OptLevel,

    /// Compile functions on multiple threads.
    #[serde(default = "defaults::parallel_compilation")]
    pub parallel_compilation: bool,

    /// Enable the pooling allocator.
    ///
    /// Instance slots are pre-allocated, which makes instantiation cheap at
    /// the cost of reserving virtual memory up front.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per pooled instance slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Host-side cap on the linear memory of a single instance, in megabytes.
    ///
    /// Growth past this limit fails even if the module's declared maximum
    /// would allow it. `None` leaves only the declared maximum in force.
    #[serde(default)]
    pub max_memory_mb: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::default(),
            parallel_compilation: defaults::parallel_compilation(),
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            max_memory_mb: None,
        }
    }
}

impl EngineConfig {
    /// Host-side memory cap in bytes, if one is configured.
    pub fn max_memory_bytes(&self) -> Option<usize> {
        self.max_memory_mb.map(|mb| (mb as usize) * 1024 * 1024)
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn parallel_compilation() -> bool {
        true
    }

    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }
}
