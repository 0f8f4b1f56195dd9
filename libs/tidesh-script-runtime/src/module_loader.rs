// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Materializes embedded script source as a loadable module.
//!
//! The engine's module-loading primitive takes a file path, so embedded
//! source is written to a uniquely named, owner-only temporary file with the
//! engine's extension, compiled from there, and the artifact is removed
//! again no matter how the load attempt ends. Nothing of the script source
//! outlives the load in the shared temp directory.

use std::io::Write;

use rhai::{AST, Engine};
use tempfile::NamedTempFile;

use crate::error::{PluginError, Result};

/// Write `source` to a fresh temporary artifact.
///
/// `tempfile` gives us the rest of the contract for free: the name is
/// unique, the file is created with owner-only permissions (0600 on Unix),
/// and the artifact is deleted when the guard drops on any exit path.
fn materialize_source(source: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("tidesh-plugin-")
        .suffix(".rhai")
        .tempfile()?;
    file.write_all(source.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Compile embedded script source into an engine module.
///
/// Failures carry the engine's own diagnostic (message and position) so a
/// broken script surfaces as a descriptive initialization error, not a
/// crash.
pub fn load_module(engine: &Engine, source: &str) -> Result<AST> {
    let artifact = materialize_source(source)?;
    let path = artifact.path().to_path_buf();
    tracing::debug!("loading script module from {}", path.display());

    let result = engine
        .compile_file(path)
        .map_err(|err| PluginError::ScriptCompile(err.to_string()));

    // `artifact` drops here, removing the file after the load attempt
    // whether or not compilation succeeded.
    drop(artifact);
    result
}

/// Verify that the compiled module exports a callable function `name` taking
/// `arity` parameters. Checked before the bridge ever reports Running, so a
/// missing handler is an initialization failure rather than a surprise on
/// the first command.
pub fn resolve_export(ast: &AST, name: &str, arity: usize) -> Result<()> {
    let found = ast
        .iter_functions()
        .any(|f| f.name == name && f.params.len() == arity);
    if found {
        Ok(())
    } else {
        Err(PluginError::MissingExport(name.to_string()))
    }
}
