// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::ffi::{CStr, CString, c_char, c_int};
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use libloading::Library;
use tidesh_plugin_abi::{
    PLUGIN_INTERFACE_VERSION, PluginArgs, PluginFreeMemoryFn, PluginGetCommandsFn,
    PluginGetDefaultSettingsFn, PluginGetInfoFn, PluginGetSubscribedEventsFn,
    PluginHandleCommandFn, PluginInitializeFn, PluginLastErrorFn, PluginSetting,
    PluginShutdownFn, PluginUpdateSettingFn, ResultCode, symbols,
};

/// A loaded plugin behind a typed interface.
///
/// All required symbols are resolved and the interface version is verified
/// inside [`PluginHandle::open`], before any other plugin call. The static
/// tables (commands, events, default settings) are copied into owned strings
/// at open time; afterwards only the dispatch entry points are invoked.
///
/// The underlying [`Library`] is owned by the handle and must remain alive
/// while any plugin code can run; dropping the handle shuts the plugin down
/// first and unloads the library last.
pub struct PluginHandle {
    name: String,
    version: String,
    description: String,
    author: String,

    initialize: PluginInitializeFn,
    shutdown: PluginShutdownFn,
    handle_command: PluginHandleCommandFn,
    update_setting: PluginUpdateSettingFn,
    free_memory: PluginFreeMemoryFn,
    /// Optional diagnostic accessor; absent on plugins that predate it.
    last_error: Option<PluginLastErrorFn>,

    commands: Vec<String>,
    subscribed_events: Vec<String>,
    default_settings: Vec<(String, String)>,

    initialized: bool,

    // Declared last: plugin code must outlive every resolved entry point.
    _lib: Library,
}

impl PluginHandle {
    /// Open a plugin shared library and wrap it behind the typed interface.
    ///
    /// # Errors
    /// - Library failed to load
    /// - A required symbol is missing
    /// - Interface-version mismatch (rejected before any other call)
    pub fn open(path: &Path) -> Result<Self> {
        let lib = unsafe {
            Library::new(path)
                .with_context(|| format!("Failed to load plugin library: {}", path.display()))?
        };

        unsafe {
            let get_info: PluginGetInfoFn = resolve(&lib, path, symbols::GET_INFO)?;

            // Version gate comes first: a mismatched plugin gets no further
            // calls, not even the static table accessors.
            let info = get_info();
            if info.is_null() {
                bail!(
                    "Plugin '{}' returned no plugin info; rejecting",
                    path.display()
                );
            }
            let interface_version = (*info).interface_version;
            if interface_version != PLUGIN_INTERFACE_VERSION {
                bail!(
                    "Interface version mismatch for '{}': plugin has v{}, host expects v{}. \
                     Rebuild the plugin against a compatible tidesh-plugin-abi.",
                    path.display(),
                    interface_version,
                    PLUGIN_INTERFACE_VERSION
                );
            }

            let name = copy_cstr((*info).name);
            let version = copy_cstr((*info).version);
            let description = copy_cstr((*info).description);
            let author = copy_cstr((*info).author);

            let get_commands: PluginGetCommandsFn = resolve(&lib, path, symbols::GET_COMMANDS)?;
            let get_events: PluginGetSubscribedEventsFn =
                resolve(&lib, path, symbols::GET_SUBSCRIBED_EVENTS)?;
            let get_settings: PluginGetDefaultSettingsFn =
                resolve(&lib, path, symbols::GET_DEFAULT_SETTINGS)?;

            let commands = copy_cstr_table(get_commands);
            let subscribed_events = copy_cstr_table(get_events);
            let default_settings = copy_setting_table(get_settings);

            let handle = Self {
                name,
                version,
                description,
                author,
                initialize: resolve(&lib, path, symbols::INITIALIZE)?,
                shutdown: resolve(&lib, path, symbols::SHUTDOWN)?,
                handle_command: resolve(&lib, path, symbols::HANDLE_COMMAND)?,
                update_setting: resolve(&lib, path, symbols::UPDATE_SETTING)?,
                free_memory: resolve(&lib, path, symbols::FREE_MEMORY)?,
                last_error: resolve(&lib, path, symbols::LAST_ERROR).ok(),
                commands,
                subscribed_events,
                default_settings,
                initialized: false,
                _lib: lib,
            };

            tracing::info!(
                "Loaded plugin '{}' v{} ({} command(s))",
                handle.name,
                handle.version,
                handle.commands.len()
            );
            Ok(handle)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    /// Command names this plugin claims to handle.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Event names this plugin wants to be notified of.
    pub fn subscribed_events(&self) -> &[String] {
        &self.subscribed_events
    }

    /// Declared settings as (key, default value) pairs.
    pub fn default_settings(&self) -> &[(String, String)] {
        &self.default_settings
    }

    /// Run the plugin's one-time setup.
    pub fn initialize(&mut self) -> ResultCode {
        if self.initialized {
            tracing::warn!("plugin '{}' already initialized", self.name);
            return ResultCode::ErrorGeneral;
        }
        let code = ResultCode::from_raw(unsafe { (self.initialize)() });
        self.initialized = code.is_success();
        code
    }

    /// Shut the plugin down. Safe to call at most once after a successful
    /// initialize; a no-op otherwise.
    pub fn shutdown(&mut self) {
        if self.initialized {
            unsafe { (self.shutdown)() };
            self.initialized = false;
        }
    }

    /// Dispatch a command invocation. Argument 0 is the command name.
    pub fn handle_command(&self, args: &[&str]) -> Result<ResultCode> {
        let storage: Vec<CString> = args
            .iter()
            .map(|arg| CString::new(*arg))
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| anyhow!("command argument contains an interior NUL byte"))?;
        let pointers: Vec<*const c_char> = storage.iter().map(|arg| arg.as_ptr()).collect();
        let invocation = PluginArgs {
            args: pointers.as_ptr(),
            count: pointers.len() as c_int,
        };

        Ok(ResultCode::from_raw(unsafe {
            (self.handle_command)(&invocation)
        }))
    }

    /// Deliver an event through the command path, per the wire convention
    /// `["event", name, data]`.
    pub fn deliver_event(&self, event: &str, data: &str) -> Result<ResultCode> {
        self.handle_command(&["event", event, data])
    }

    /// Push a setting update into the plugin.
    pub fn update_setting(&self, key: &str, value: &str) -> Result<ResultCode> {
        let key = CString::new(key).map_err(|_| anyhow!("setting key contains a NUL byte"))?;
        let value =
            CString::new(value).map_err(|_| anyhow!("setting value contains a NUL byte"))?;
        Ok(ResultCode::from_raw(unsafe {
            (self.update_setting)(key.as_ptr(), value.as_ptr())
        }))
    }

    /// Diagnostic for the most recent failure, if the plugin exports the
    /// accessor and has one recorded. The transferred buffer is released
    /// through the plugin's own allocator before returning.
    pub fn last_error(&self) -> Option<String> {
        let accessor = self.last_error?;
        let ptr = unsafe { accessor() };
        if ptr.is_null() {
            return None;
        }
        let message = unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() };
        unsafe { (self.free_memory)(ptr.cast()) };
        Some(message)
    }
}

impl Drop for PluginHandle {
    fn drop(&mut self) {
        // Guarantees no ABI call is ever delivered to a torn-down plugin:
        // shutdown runs first, the library unloads after all fields.
        self.shutdown();
    }
}

unsafe fn resolve<T: Copy>(lib: &Library, path: &Path, symbol: &[u8]) -> Result<T> {
    unsafe {
        let resolved = lib.get::<T>(symbol).with_context(|| {
            format!(
                "Plugin '{}' missing symbol '{}'",
                path.display(),
                String::from_utf8_lossy(&symbol[..symbol.len() - 1])
            )
        })?;
        Ok(*resolved)
    }
}

unsafe fn copy_cstr(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() }
}

unsafe fn copy_cstr_table(accessor: unsafe extern "C" fn(*mut c_int) -> *const *const c_char) -> Vec<String> {
    let mut count: c_int = 0;
    let table = unsafe { accessor(&mut count) };
    if table.is_null() || count <= 0 {
        return Vec::new();
    }
    (0..count as usize)
        .map(|i| unsafe { copy_cstr(*table.add(i)) })
        .collect()
}

unsafe fn copy_setting_table(accessor: PluginGetDefaultSettingsFn) -> Vec<(String, String)> {
    let mut count: c_int = 0;
    let table = unsafe { accessor(&mut count) };
    if table.is_null() || count <= 0 {
        return Vec::new();
    }
    (0..count as usize)
        .map(|i| {
            let setting: &PluginSetting = unsafe { &*table.add(i) };
            unsafe { (copy_cstr(setting.key), copy_cstr(setting.default_value)) }
        })
        .collect()
}

/// Check if a file is a plugin library based on its extension.
pub fn is_plugin_library(path: &Path) -> bool {
    let extension = path.extension().and_then(|e| e.to_str());
    match extension {
        Some("dylib") => cfg!(target_os = "macos"),
        Some("so") => cfg!(target_os = "linux"),
        Some("dll") => cfg!(target_os = "windows"),
        _ => false,
    }
}
