//! Common types, errors, and configuration for wasm-bind.
//!
//! This crate provides shared functionality used across the wasm-bind workspace:
//! - [`BindError`], the error taxonomy of the binding layer
//! - [`EngineConfig`] and the TOML [`ConfigFile`]

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{EngineConfig, OptLevel, WASM_PAGE_SIZE};
pub use config_file::{ConfigFile, ConfigFileError, LogFormat, LoggingConfig};
pub use error::BindError;
