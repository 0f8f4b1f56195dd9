// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Embedding layer for script-backed tidesh plugins.
//!
//! A script-backed plugin implements its commands in [rhai] instead of
//! native code. This crate owns everything between the plugin's C facade and
//! the embedded engine:
//!
//! - [`ScriptBridge`] - a dedicated engine thread, its command loop, and the
//!   start/stop state machine
//! - [`SettingStore`] - the plugin's configuration surface, shared between
//!   the host thread (writes) and the engine thread (reads)
//! - [`marshal`] - argument and return-code conversion across the
//!   native/script boundary
//! - [`module_loader`] - materializes embedded script source as a temporary
//!   artifact and compiles it inside the engine
//!
//! The engine is thread-affine: it is created on the engine thread after
//! spawn and dropped before the thread exits, and no other thread ever
//! touches it. Host-side calls are submitted as messages and answered over
//! per-call reply channels.

pub mod bridge;
pub mod error;
pub mod marshal;
pub mod module_loader;
pub mod settings;

pub use bridge::{BridgeState, ScriptBridge, STARTUP_TIMEOUT};
pub use error::{PluginError, Result};
pub use settings::SettingStore;
