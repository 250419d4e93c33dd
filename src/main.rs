//! wasm-bind CLI entry point.
//!
//! Loads WebAssembly modules from disk, inspects their exports and calls
//! exported functions. Modules ending in `.wat` are parsed from text first.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use wasm_bind_common::{ConfigFile, LogFormat, LoggingConfig};
use wasm_bind_core::{Instance, Module, SharedEngine, Value, WasmEngine};

#[derive(Debug, Parser)]
#[command(name = "wasm-bind", version, about = "Load, inspect and call WebAssembly modules")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short, global = true, env = "WASM_BIND_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check whether a file is a valid module.
    Validate {
        file: PathBuf,
    },

    /// List a module's exports.
    Exports {
        file: PathBuf,
    },

    /// Call an exported function.
    ///
    /// Arguments are `i32:1`, `i64:2`, `f32:1.5`, `f64:2.5`, `true`, `false`,
    /// a bare integer (i32) or a bare decimal (f64).
    Call {
        file: PathBuf,
        function: String,
        #[arg(allow_hyphen_values = true)]
        args: Vec<Value>,
    },

    /// Compile a module and write the serialized artifact.
    Precompile {
        file: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Call an exported function of a precompiled artifact.
    RunArtifact {
        file: PathBuf,
        function: String,
        #[arg(allow_hyphen_values = true)]
        args: Vec<Value>,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Invalid configuration file {}", path.display()))?,
        None => ConfigFile::default(),
    };

    init_tracing(&config.logging);

    let engine: SharedEngine = Arc::new(WasmEngine::new(&config.engine)?);
    info!(opt_level = ?config.engine.opt_level, "Engine ready");

    match cli.command {
        Command::Validate { file } => {
            let bytes = read_module(&file)?;
            if Module::validate(&engine, &bytes) {
                println!("valid");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("invalid");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Exports { file } => {
            let instance = Instance::from_bytes(&engine, &read_module(&file)?)?;

            let mut exports: Vec<_> = instance.exports()?.iter().collect();
            exports.sort_unstable_by_key(|(name, _)| *name);
            for (name, export) in exports {
                println!("{:<8} {name}", export.kind());
            }

            instance.close();
            Ok(ExitCode::SUCCESS)
        }
        Command::Call {
            file,
            function,
            args,
        } => {
            let instance = Instance::from_bytes(&engine, &read_module(&file)?)?;
            let outcome = call(&instance, &function, &args);
            instance.close();
            outcome
        }
        Command::Precompile { file, output } => {
            let start = Instant::now();
            let module = Module::compile(&engine, &read_module(&file)?)?;
            let artifact = module.serialize()?;

            std::fs::write(&output, &artifact)
                .with_context(|| format!("Failed to write {}", output.display()))?;

            info!(
                output = %output.display(),
                artifact_len = artifact.len(),
                duration_ms = start.elapsed().as_millis(),
                "Artifact written"
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::RunArtifact {
            file,
            function,
            args,
        } => {
            let artifact = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let module = Module::deserialize(&engine, &artifact)?;
            let instance = module.instantiate()?;
            module.close();

            let outcome = call(&instance, &function, &args);
            instance.close();
            outcome
        }
    }
}

/// Initialize tracing. `RUST_LOG` takes precedence over the configured filter.
///
/// Logs go to stderr; stdout carries command output only.
fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// Read a module from disk, converting `.wat` text to binary.
fn read_module(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path.extension().is_some_and(|ext| ext == "wat") {
        return wat::parse_file(path).with_context(|| format!("Failed to parse {}", path.display()));
    }

    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Call `function` and print its results on one line.
fn call(instance: &Instance, function: &str, args: &[Value]) -> anyhow::Result<ExitCode> {
    let func = instance
        .get_function(function)?
        .with_context(|| format!("Module has no exported function `{function}`"))?;

    let results = func.apply(args)?;
    if results.is_empty() {
        println!("()");
    } else {
        let rendered: Vec<String> = results.iter().map(ToString::to_string).collect();
        println!("{}", rendered.join(" "));
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_call_arguments_parse_as_values() {
        let cli = Cli::try_parse_from([
            "wasm-bind", "call", "tests.wasm", "sum", "1", "-3", "i64:-2", "true", "2.5",
        ])
        .unwrap();

        let Command::Call { function, args, .. } = cli.command else {
            panic!("expected the call command");
        };
        assert_eq!(function, "sum");
        assert_eq!(
            args,
            [
                Value::I32(1),
                Value::I32(-3),
                Value::I64(-2),
                Value::I32(1),
                Value::F64(2.5)
            ]
        );
    }

    #[test]
    fn test_bad_argument_is_rejected() {
        let result = Cli::try_parse_from(["wasm-bind", "call", "tests.wasm", "sum", "u8:1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_precompile_requires_output() {
        assert!(Cli::try_parse_from(["wasm-bind", "precompile", "tests.wasm"]).is_err());

        let cli =
            Cli::try_parse_from(["wasm-bind", "precompile", "tests.wasm", "-o", "tests.wbm"])
                .unwrap();
        assert!(matches!(cli.command, Command::Precompile { .. }));
    }

    #[test]
    fn test_read_module_parses_wat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wat");
        std::fs::write(&path, "(module)").unwrap();

        let bytes = read_module(&path).unwrap();
        assert_eq!(&bytes[..4], b"\0asm");
    }

    #[test]
    fn test_read_module_missing_file() {
        let err = read_module(Path::new("/nonexistent/module.wasm")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
