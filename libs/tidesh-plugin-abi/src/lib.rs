// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! ABI-stable plugin interface for tidesh dynamic plugin loading.
//!
//! This crate defines the binary contract between the shell and its plugins:
//! the `#[repr(C)]` structs that cross the boundary, the result-code
//! enumeration, the interface version, and the exact symbol names every
//! plugin shared library must export. Both sides depend on this crate and
//! nothing else; the contract has no runtime dependencies.
//!
//! # Required exports
//!
//! Every plugin must export the following symbols with the signatures given
//! by the matching `*Fn` aliases below:
//!
//! - `plugin_get_info`: static plugin metadata, callable before initialization
//! - `plugin_initialize`: one-time setup, returns a [`ResultCode`] value
//! - `plugin_shutdown`: one-time teardown after a successful initialize
//! - `plugin_handle_command`: synchronous command dispatch
//! - `plugin_get_commands` / `plugin_get_subscribed_events` /
//!   `plugin_get_default_settings`: static tables with out-parameter counts
//! - `plugin_update_setting`: settings write path
//! - `plugin_free_memory`: releases buffers whose ownership transferred to
//!   the host (the static tables above are not freed)
//!
//! Plugins may additionally export `plugin_last_error` to surface a
//! diagnostic string for the most recent failure without changing the
//! integer ABI of any other call.

use std::ffi::{c_char, c_int, c_void};

/// Current plugin interface version. Plugins must report this exact value in
/// [`PluginInfo::interface_version`] to be loaded.
///
/// Increment when making breaking changes to the plugin interface.
pub const PLUGIN_INTERFACE_VERSION: c_int = 1;

/// Result codes crossing the native/script boundary in both directions.
///
/// The integer values are part of the ABI and must remain stable across
/// plugin versions.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Operation completed successfully.
    Success = 0,
    /// Generic failure: engine not running, exception inside the engine,
    /// missing handler, type-coercion failure.
    ErrorGeneral = -1,
    /// Malformed invocation, unknown setting key, or rejected value.
    ErrorInvalidArgs = -2,
    /// The plugin declines to implement the requested operation.
    ErrorNotImplemented = -3,
}

impl ResultCode {
    /// Raw ABI value of this code.
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Decode a raw ABI value. Unknown values collapse to
    /// [`ResultCode::ErrorGeneral`] so a newer plugin's private codes never
    /// read as success on an older host.
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Success,
            -2 => Self::ErrorInvalidArgs,
            -3 => Self::ErrorNotImplemented,
            _ => Self::ErrorGeneral,
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Plugin identity, returned by `plugin_get_info`.
///
/// All pointers reference storage owned by the plugin that stays valid for
/// the plugin's lifetime; the host copies what it needs and frees nothing.
#[repr(C)]
pub struct PluginInfo {
    pub name: *const c_char,
    pub version: *const c_char,
    pub description: *const c_char,
    pub author: *const c_char,
    /// Must equal [`PLUGIN_INTERFACE_VERSION`] or the host rejects the
    /// plugin before any other call.
    pub interface_version: c_int,
}

// Safety: PluginInfo instances handed across the ABI point at 'static
// immutable data inside the plugin image and are never written after
// construction.
unsafe impl Send for PluginInfo {}
unsafe impl Sync for PluginInfo {}

/// A declared setting: key plus its default value, both plugin-owned
/// static strings.
#[repr(C)]
pub struct PluginSetting {
    pub key: *const c_char,
    pub default_value: *const c_char,
}

// Safety: same 'static immutable-data contract as PluginInfo.
unsafe impl Send for PluginSetting {}
unsafe impl Sync for PluginSetting {}

/// A command invocation: ordered argument strings, argument 0 is the
/// command name. Owned by the caller and not retained by the plugin beyond
/// the call.
#[repr(C)]
pub struct PluginArgs {
    pub args: *const *const c_char,
    pub count: c_int,
}

/// Wrapper that lets a plugin keep its command/event tables in a `static`.
///
/// A bare `[*const c_char; N]` is not `Sync`, so it cannot live in a
/// `static` even when every pointer targets a C string literal. Plugins
/// build their tables from `c"..."` literals and export `.0.as_ptr()`.
#[repr(transparent)]
pub struct StaticCStrs<const N: usize>(pub [*const c_char; N]);

// Safety: the wrapper exists precisely for tables of pointers to 'static
// immutable C string literals.
unsafe impl<const N: usize> Send for StaticCStrs<N> {}
unsafe impl<const N: usize> Sync for StaticCStrs<N> {}

/// Static table of declared settings, same rationale as [`StaticCStrs`].
#[repr(transparent)]
pub struct StaticSettings<const N: usize>(pub [PluginSetting; N]);

pub type PluginGetInfoFn = unsafe extern "C" fn() -> *const PluginInfo;
pub type PluginInitializeFn = unsafe extern "C" fn() -> c_int;
pub type PluginShutdownFn = unsafe extern "C" fn();
pub type PluginHandleCommandFn = unsafe extern "C" fn(args: *const PluginArgs) -> c_int;
pub type PluginGetCommandsFn = unsafe extern "C" fn(count: *mut c_int) -> *const *const c_char;
pub type PluginGetSubscribedEventsFn =
    unsafe extern "C" fn(count: *mut c_int) -> *const *const c_char;
pub type PluginGetDefaultSettingsFn =
    unsafe extern "C" fn(count: *mut c_int) -> *const PluginSetting;
pub type PluginUpdateSettingFn =
    unsafe extern "C" fn(key: *const c_char, value: *const c_char) -> c_int;
pub type PluginFreeMemoryFn = unsafe extern "C" fn(ptr: *mut c_void);
pub type PluginLastErrorFn = unsafe extern "C" fn() -> *mut c_char;

/// Export symbol names the host resolves, null-terminated for `dlsym`-style
/// lookup through `libloading`.
pub mod symbols {
    pub const GET_INFO: &[u8] = b"plugin_get_info\0";
    pub const INITIALIZE: &[u8] = b"plugin_initialize\0";
    pub const SHUTDOWN: &[u8] = b"plugin_shutdown\0";
    pub const HANDLE_COMMAND: &[u8] = b"plugin_handle_command\0";
    pub const GET_COMMANDS: &[u8] = b"plugin_get_commands\0";
    pub const GET_SUBSCRIBED_EVENTS: &[u8] = b"plugin_get_subscribed_events\0";
    pub const GET_DEFAULT_SETTINGS: &[u8] = b"plugin_get_default_settings\0";
    pub const UPDATE_SETTING: &[u8] = b"plugin_update_setting\0";
    pub const FREE_MEMORY: &[u8] = b"plugin_free_memory\0";
    /// Optional diagnostic accessor; hosts probe for it and tolerate absence.
    pub const LAST_ERROR: &[u8] = b"plugin_last_error\0";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_raw_values_are_stable() {
        assert_eq!(ResultCode::Success.as_raw(), 0);
        assert_eq!(ResultCode::ErrorGeneral.as_raw(), -1);
        assert_eq!(ResultCode::ErrorInvalidArgs.as_raw(), -2);
        assert_eq!(ResultCode::ErrorNotImplemented.as_raw(), -3);
    }

    #[test]
    fn test_result_code_round_trip() {
        for code in [
            ResultCode::Success,
            ResultCode::ErrorGeneral,
            ResultCode::ErrorInvalidArgs,
            ResultCode::ErrorNotImplemented,
        ] {
            assert_eq!(ResultCode::from_raw(code.as_raw()), code);
        }
    }

    #[test]
    fn test_unknown_raw_codes_decode_as_general_failure() {
        assert_eq!(ResultCode::from_raw(-99), ResultCode::ErrorGeneral);
        assert_eq!(ResultCode::from_raw(1), ResultCode::ErrorGeneral);
        assert_eq!(ResultCode::from_raw(i32::MIN), ResultCode::ErrorGeneral);
    }

    #[test]
    fn test_symbol_names_are_null_terminated() {
        for sym in [
            symbols::GET_INFO,
            symbols::INITIALIZE,
            symbols::SHUTDOWN,
            symbols::HANDLE_COMMAND,
            symbols::GET_COMMANDS,
            symbols::GET_SUBSCRIBED_EVENTS,
            symbols::GET_DEFAULT_SETTINGS,
            symbols::UPDATE_SETTING,
            symbols::FREE_MEMORY,
            symbols::LAST_ERROR,
        ] {
            assert_eq!(sym.last(), Some(&0u8));
            assert!(sym.starts_with(b"plugin_"));
        }
    }

    #[test]
    fn test_static_tables_are_sync() {
        static COMMANDS: StaticCStrs<2> = StaticCStrs([c"greet".as_ptr(), c"hello".as_ptr()]);
        static SETTINGS: StaticSettings<1> = StaticSettings([PluginSetting {
            key: c"greeting".as_ptr(),
            default_value: c"Hello".as_ptr(),
        }]);

        assert_eq!(COMMANDS.0.len(), 2);
        assert!(!SETTINGS.0[0].key.is_null());
    }
}
