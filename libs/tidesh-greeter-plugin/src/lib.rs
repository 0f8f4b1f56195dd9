// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Plugin cdylib — the public surface is unsafe extern "C" entry points
// resolved by the host loader via dlopen.
#![allow(clippy::missing_safety_doc)]

//! Reference tidesh plugin: greeter commands implemented by an embedded
//! rhai script.
//!
//! This crate is the thin facade over the script runtime. It exports the
//! nine ABI entry points plus the optional `plugin_last_error` accessor,
//! owns the static info/command/event/setting tables, and delegates every
//! stateful operation to a [`ScriptBridge`] running the embedded
//! `greeter.rhai` module on its own engine thread.
//!
//! The exported C ABI has no instance parameter, so exactly one plugin
//! instance lives behind a process-wide slot; the bridge and store
//! underneath are ordinary owned values and carry no global state of their
//! own.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::panic::AssertUnwindSafe;

use parking_lot::{Mutex, RwLock};
use tidesh_plugin_abi::{
    PLUGIN_INTERFACE_VERSION, PluginArgs, PluginInfo, PluginSetting, ResultCode, StaticCStrs,
    StaticSettings,
};
use tidesh_script_runtime::{PluginError, ScriptBridge, SettingStore};

/// The embedded script module. Loaded into the engine through the temporary
/// artifact contract at initialize time.
const GREETER_SCRIPT: &str = include_str!("greeter.rhai");

// ============================================================================
// Static plugin tables
// ============================================================================

static INFO: PluginInfo = PluginInfo {
    name: c"greeter".as_ptr(),
    version: c"0.1.0".as_ptr(),
    description: c"Greeter commands backed by an embedded rhai script".as_ptr(),
    author: c"tidesh developers".as_ptr(),
    interface_version: PLUGIN_INTERFACE_VERSION,
};

static COMMANDS: StaticCStrs<2> = StaticCStrs([c"greet".as_ptr(), c"hello".as_ptr()]);

static EVENTS: StaticCStrs<1> = StaticCStrs([c"main_process_start".as_ptr()]);

// Single source of truth for the declared settings: the setting store is
// built from this table at initialize time.
static DEFAULT_SETTINGS: StaticSettings<1> = StaticSettings([PluginSetting {
    key: c"greeting".as_ptr(),
    default_value: c"Hello from tidesh".as_ptr(),
}]);

// ============================================================================
// Plugin state
// ============================================================================

struct GreeterPlugin {
    bridge: ScriptBridge,
}

/// The one live plugin instance. Read-locked by command and setting
/// dispatch, write-locked by initialize and shutdown.
static PLUGIN: RwLock<Option<GreeterPlugin>> = RwLock::new(None);

/// Most recent failure diagnostic, surfaced through `plugin_last_error`.
static LAST_ERROR: Mutex<Option<String>> = Mutex::new(None);

fn record_failure(err: PluginError) -> c_int {
    tracing::error!("greeter plugin: {err}");
    *LAST_ERROR.lock() = Some(err.to_string());
    err.result_code().as_raw()
}

/// Run an FFI body with a panic fence: nothing may unwind across the ABI
/// boundary, a panic degrades to a general failure.
fn ffi_guard<F: FnOnce() -> c_int>(body: F) -> c_int {
    match std::panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(code) => code,
        Err(_) => {
            *LAST_ERROR.lock() = Some("panic inside plugin entry point".to_string());
            ResultCode::ErrorGeneral.as_raw()
        }
    }
}

/// A dlopen'd plugin has no host-side tracing subscriber; without one every
/// diagnostic would be silently dropped. Install a stderr writer once.
fn init_plugin_logging() {
    use std::sync::Once;
    static LOGGING: Once = Once::new();
    LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

fn declared_defaults() -> Vec<(String, String)> {
    DEFAULT_SETTINGS
        .0
        .iter()
        .map(|setting| unsafe {
            (
                CStr::from_ptr(setting.key).to_string_lossy().into_owned(),
                CStr::from_ptr(setting.default_value)
                    .to_string_lossy()
                    .into_owned(),
            )
        })
        .collect()
}

unsafe fn parse_invocation(args: *const PluginArgs) -> Result<Vec<String>, PluginError> {
    if args.is_null() {
        return Err(PluginError::InvalidArgs("null invocation".into()));
    }
    let invocation = unsafe { &*args };
    if invocation.count <= 0 || invocation.args.is_null() {
        return Err(PluginError::InvalidArgs("empty invocation".into()));
    }

    let mut parsed = Vec::with_capacity(invocation.count as usize);
    for i in 0..invocation.count as usize {
        let arg = unsafe { *invocation.args.add(i) };
        if arg.is_null() {
            return Err(PluginError::InvalidArgs(format!("argument {i} is null")));
        }
        let arg = unsafe { CStr::from_ptr(arg) }
            .to_str()
            .map_err(|_| PluginError::InvalidArgs(format!("argument {i} is not valid UTF-8")))?;
        parsed.push(arg.to_string());
    }
    Ok(parsed)
}

// ============================================================================
// C ABI — identity and static tables
// ============================================================================

/// Static plugin identity. No side effects, callable before initialization.
#[unsafe(no_mangle)]
pub extern "C" fn plugin_get_info() -> *const PluginInfo {
    &INFO
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn plugin_get_commands(count: *mut c_int) -> *const *const c_char {
    if !count.is_null() {
        unsafe { *count = COMMANDS.0.len() as c_int };
    }
    COMMANDS.0.as_ptr()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn plugin_get_subscribed_events(count: *mut c_int) -> *const *const c_char {
    if !count.is_null() {
        unsafe { *count = EVENTS.0.len() as c_int };
    }
    EVENTS.0.as_ptr()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn plugin_get_default_settings(count: *mut c_int) -> *const PluginSetting {
    if !count.is_null() {
        unsafe { *count = DEFAULT_SETTINGS.0.len() as c_int };
    }
    DEFAULT_SETTINGS.0.as_ptr()
}

// ============================================================================
// C ABI — lifecycle
// ============================================================================

/// One-time setup: builds the setting store from the declared defaults and
/// starts the engine bridge (spawns the engine thread, loads the script
/// module, blocks on the readiness handshake).
#[unsafe(no_mangle)]
pub extern "C" fn plugin_initialize() -> c_int {
    init_plugin_logging();
    ffi_guard(|| {
        let mut slot = PLUGIN.write();
        if slot.is_some() {
            // The loader owns the call-once contract; this guard just keeps
            // a second bridge from ever existing.
            tracing::warn!("plugin_initialize called on an initialized plugin");
            return record_failure(PluginError::Bridge("plugin already initialized".into()));
        }

        let defaults = declared_defaults();
        let settings = SettingStore::new(defaults.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let mut bridge = ScriptBridge::new(std::sync::Arc::new(settings));
        match bridge.start(GREETER_SCRIPT) {
            Ok(()) => {
                *slot = Some(GreeterPlugin { bridge });
                tracing::info!("greeter plugin initialized");
                ResultCode::Success.as_raw()
            }
            Err(err) => record_failure(err),
        }
    })
}

/// Tears the plugin down: requests the engine loop to stop and joins the
/// engine thread before returning. Safe to call at most once after a
/// successful initialize; a no-op otherwise.
#[unsafe(no_mangle)]
pub extern "C" fn plugin_shutdown() {
    ffi_guard(|| {
        let mut slot = PLUGIN.write();
        if let Some(mut plugin) = slot.take() {
            if let Err(err) = plugin.bridge.stop() {
                tracing::warn!("greeter plugin shutdown: {err}");
            }
            tracing::info!("greeter plugin shut down");
        }
        ResultCode::Success.as_raw()
    });
}

// ============================================================================
// C ABI — dispatch
// ============================================================================

/// Synchronous command dispatch. The invocation is marshaled onto the
/// engine thread and the script handler's own result code is returned
/// verbatim; marshaling or engine failures map to the stable error codes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn plugin_handle_command(args: *const PluginArgs) -> c_int {
    let invocation = match unsafe { parse_invocation(args) } {
        Ok(invocation) => invocation,
        Err(err) => return record_failure(err),
    };

    ffi_guard(move || {
        let guard = PLUGIN.read();
        let Some(plugin) = guard.as_ref() else {
            return record_failure(PluginError::NotRunning);
        };
        match plugin.bridge.handle_command(invocation) {
            Ok(code) => code,
            Err(err) => record_failure(err),
        }
    })
}

/// Settings write path. The script validates the update; on acceptance the
/// store is written before this returns, so the next command reads the new
/// value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn plugin_update_setting(key: *const c_char, value: *const c_char) -> c_int {
    if key.is_null() || value.is_null() {
        return record_failure(PluginError::InvalidArgs("null setting key or value".into()));
    }
    let (key, value) = unsafe {
        match (CStr::from_ptr(key).to_str(), CStr::from_ptr(value).to_str()) {
            (Ok(key), Ok(value)) => (key.to_string(), value.to_string()),
            _ => {
                return record_failure(PluginError::InvalidArgs(
                    "setting key or value is not valid UTF-8".into(),
                ));
            }
        }
    };

    ffi_guard(move || {
        let guard = PLUGIN.read();
        let Some(plugin) = guard.as_ref() else {
            return record_failure(PluginError::NotRunning);
        };
        match plugin.bridge.update_setting(&key, &value) {
            Ok(code) => code,
            Err(err) => record_failure(err),
        }
    })
}

// ============================================================================
// C ABI — memory and diagnostics
// ============================================================================

/// Diagnostic for the most recent failure, or null if none was recorded.
/// Ownership of the buffer transfers to the host, which must release it
/// through `plugin_free_memory`.
#[unsafe(no_mangle)]
pub extern "C" fn plugin_last_error() -> *mut c_char {
    let last = LAST_ERROR.lock();
    match last.as_deref().and_then(|msg| CString::new(msg).ok()) {
        Some(msg) => msg.into_raw(),
        None => std::ptr::null_mut(),
    }
}

/// Releases a buffer previously returned by this plugin. Required because
/// the host cannot use the plugin's allocator directly.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn plugin_free_memory(ptr: *mut c_void) {
    if !ptr.is_null() {
        // Everything this plugin hands out is a CString it allocated.
        drop(unsafe { CString::from_raw(ptr.cast::<c_char>()) });
    }
}
