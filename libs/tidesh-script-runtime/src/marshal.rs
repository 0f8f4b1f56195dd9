// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Argument and return-value marshaling across the native/script boundary.
//!
//! Host to engine: every invocation argument becomes an engine string, in
//! original order, packed into a single engine array that is passed as the
//! one parameter of the command handler. Setting updates pass `(key, value)`
//! as two string arguments.
//!
//! Engine to host: the handler's return value is coerced to a signed 32-bit
//! result code. A wrong type or an out-of-range integer is a coercion
//! failure, which the facade surfaces as a general failure rather than a
//! crash.

use rhai::Dynamic;

use crate::error::{PluginError, Result};

/// Fixed name of the script's command handler export.
pub const HANDLE_COMMAND_FN: &str = "handleCommand";

/// Fixed name of the script's setting-update export.
pub const UPDATE_SETTING_FN: &str = "updateSetting";

/// Pack invocation arguments into the engine's ordered collection.
pub fn to_engine_args(args: &[String]) -> rhai::Array {
    args.iter().map(|arg| Dynamic::from(arg.clone())).collect()
}

/// Coerce a handler return value into an ABI result code.
pub fn coerce_result(value: Dynamic) -> Result<i32> {
    let type_name = value.type_name();
    let wide = value.as_int().map_err(|_| {
        PluginError::TypeCoercion(format!(
            "handler returned {type_name}, expected an integer result code"
        ))
    })?;
    i32::try_from(wide).map_err(|_| {
        PluginError::TypeCoercion(format!("handler result {wide} does not fit a result code"))
    })
}
