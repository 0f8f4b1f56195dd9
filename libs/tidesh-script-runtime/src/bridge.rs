// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Runtime bridge between the plugin facade and the embedded engine.
//!
//! The engine environment is thread-affine: every direct call into it
//! (module loading, function resolution, invocation) must happen on the
//! thread that created it. The bridge therefore spawns one dedicated engine
//! thread and reframes every host-side call as a task submission: the host
//! thread sends an [`EngineCommand`] carrying a reply channel and blocks
//! until the engine thread answers. The command loop over that queue is the
//! embedded event loop; a `Shutdown` message wakes it out of its blocking
//! wait.
//!
//! # State transitions
//!
//! ```text
//! ┌───────────┐
//! │ Unstarted │
//! └─────┬─────┘
//!       │ start()
//!       ▼
//! ┌──────────┐  load/verify failed or timeout
//! │ Starting │─────────────────────────────┐
//! └────┬─────┘                             │
//!      │ engine signaled ready             │
//!      ▼                                   │
//! ┌─────────┐  stop()   ┌──────────┐       ▼
//! │ Running │──────────►│ Stopping │──► Stopped
//! └─────────┘           └──────────┘ (thread joined)
//! ```
//!
//! No transition is skipped; command and setting operations outside Running
//! fail instead of touching a missing or torn-down environment.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::RwLock;
use rhai::{AST, CallFnOptions, Dynamic, Engine, Scope};

use crate::error::{PluginError, Result};
use crate::marshal;
use crate::module_loader;
use crate::settings::SettingStore;

/// How long `start()` waits for the engine thread to signal readiness
/// before giving up and reporting a general failure. The handshake is a
/// blocking channel receive, never a fixed sleep; this bound only exists so
/// a wedged engine cannot hang the host forever.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Bridge lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No engine thread exists yet.
    Unstarted,
    /// Engine thread spawned, environment and module load in progress.
    Starting,
    /// Engine thread is serving the command loop.
    Running,
    /// Shutdown requested, command loop unwinding.
    Stopping,
    /// Engine thread has exited and been joined. Terminal.
    Stopped,
}

type Reply<T> = Sender<Result<T>>;

/// Task submitted to the engine thread.
enum EngineCommand {
    HandleCommand { args: Vec<String>, reply: Reply<i32> },
    UpdateSetting { key: String, value: String, reply: Reply<i32> },
    Shutdown,
}

/// Owns the engine thread and mediates all calls into the embedded engine.
///
/// The engine environment itself (engine, compiled module, scope) never
/// leaves the engine thread; the bridge holds only the command sender and
/// the join handle.
pub struct ScriptBridge {
    state: RwLock<BridgeState>,
    settings: Arc<SettingStore>,
    commands: Option<Sender<EngineCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl ScriptBridge {
    pub fn new(settings: Arc<SettingStore>) -> Self {
        Self {
            state: RwLock::new(BridgeState::Unstarted),
            settings,
            commands: None,
            thread: None,
        }
    }

    pub fn state(&self) -> BridgeState {
        *self.state.read()
    }

    /// Spawn the engine thread, load the script module, and block until the
    /// engine signals Running or reports why it could not.
    pub fn start(&mut self, source: &str) -> Result<()> {
        {
            let state = self.state.read();
            if *state != BridgeState::Unstarted {
                return Err(PluginError::Bridge(format!(
                    "cannot start from state {:?} (must be Unstarted)",
                    *state
                )));
            }
        }
        *self.state.write() = BridgeState::Starting;

        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (cmd_tx, cmd_rx) = unbounded::<EngineCommand>();
        let source = source.to_string();
        let settings = Arc::clone(&self.settings);

        let thread = std::thread::Builder::new()
            .name("tidesh-script-engine".into())
            .spawn(move || engine_thread_main(source, settings, ready_tx, cmd_rx))
            .map_err(|e| {
                *self.state.write() = BridgeState::Stopped;
                PluginError::Bridge(format!("failed to spawn engine thread: {e}"))
            })?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => {
                self.commands = Some(cmd_tx);
                self.thread = Some(thread);
                *self.state.write() = BridgeState::Running;
                tracing::info!("script engine running");
                Ok(())
            }
            Ok(Err(err)) => {
                // Failure path of Starting: the thread exits on its own
                // right after reporting, so joining here cannot hang.
                if thread.join().is_err() {
                    tracing::error!("engine thread panicked after reporting startup failure");
                }
                *self.state.write() = BridgeState::Stopped;
                tracing::error!("script engine failed to start: {err}");
                Err(err)
            }
            Err(RecvTimeoutError::Timeout) => {
                // The thread is wedged somewhere in environment setup. Drop
                // our end of the handshake and the command queue: its
                // eventual readiness send fails and the thread unwinds
                // without ever serving a command. Joining here could block
                // past the documented bound, so the thread is left to exit
                // on its own.
                drop(cmd_tx);
                *self.state.write() = BridgeState::Stopped;
                Err(PluginError::StartupTimeout(STARTUP_TIMEOUT))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let panicked = thread.join().is_err();
                *self.state.write() = BridgeState::Stopped;
                Err(PluginError::Bridge(if panicked {
                    "engine thread panicked during startup".into()
                } else {
                    "engine thread exited before signaling readiness".into()
                }))
            }
        }
    }

    /// Submit a command invocation and block until the engine thread
    /// produces a result.
    pub fn handle_command(&self, args: Vec<String>) -> Result<i32> {
        self.submit(|reply| EngineCommand::HandleCommand { args, reply })
    }

    /// Submit a setting update. On script acceptance the store is written on
    /// the engine thread before the reply is sent, so a caller that observes
    /// success reads its own write on the next command.
    pub fn update_setting(&self, key: &str, value: &str) -> Result<i32> {
        self.submit(|reply| EngineCommand::UpdateSetting {
            key: key.to_string(),
            value: value.to_string(),
            reply,
        })
    }

    fn submit<F>(&self, build: F) -> Result<i32>
    where
        F: FnOnce(Reply<i32>) -> EngineCommand,
    {
        if self.state() != BridgeState::Running {
            return Err(PluginError::NotRunning);
        }
        let sender = self.commands.as_ref().ok_or(PluginError::NotRunning)?;

        let (reply_tx, reply_rx) = bounded::<Result<i32>>(1);
        sender
            .send(build(reply_tx))
            .map_err(|_| PluginError::NotRunning)?;
        reply_rx
            .recv()
            .map_err(|_| PluginError::Bridge("engine thread dropped the reply".into()))?
    }

    /// Request the event loop to stop and join the engine thread. Idempotent
    /// outside Running; after return no engine-thread activity remains.
    pub fn stop(&mut self) -> Result<()> {
        if self.state() != BridgeState::Running {
            return Ok(());
        }

        tracing::info!("stopping script engine...");
        *self.state.write() = BridgeState::Stopping;

        if let Some(commands) = self.commands.take() {
            // Wakes the engine thread out of its blocking recv.
            let _ = commands.send(EngineCommand::Shutdown);
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("engine thread panicked during shutdown");
            }
        }

        *self.state.write() = BridgeState::Stopped;
        tracing::info!("script engine stopped");
        Ok(())
    }
}

impl Drop for ScriptBridge {
    fn drop(&mut self) {
        // A facade that forgets shutdown must not leak the engine thread.
        let _ = self.stop();
    }
}

/// Entry point of the engine thread. Everything engine-affine lives inside
/// this function: the environment is created after spawn and dropped before
/// the thread exits, so no call can ever reach a torn-down engine.
fn engine_thread_main(
    source: String,
    settings: Arc<SettingStore>,
    ready: Sender<Result<()>>,
    commands: Receiver<EngineCommand>,
) {
    let engine = build_engine(&settings);

    let (ast, mut scope) = match load_and_verify(&engine, &source) {
        Ok(loaded) => loaded,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    if ready.send(Ok(())).is_err() {
        // The initializer timed out and went away; nobody will ever send a
        // command, so tear down immediately.
        return;
    }

    // The command loop is the embedded event loop: it blocks on the queue
    // until work arrives or Shutdown wakes it.
    for command in commands.iter() {
        match command {
            EngineCommand::HandleCommand { args, reply } => {
                let result = invoke_i32(
                    &engine,
                    &mut scope,
                    &ast,
                    marshal::HANDLE_COMMAND_FN,
                    (marshal::to_engine_args(&args),),
                );
                let _ = reply.send(result);
            }
            EngineCommand::UpdateSetting { key, value, reply } => {
                let result = invoke_i32(
                    &engine,
                    &mut scope,
                    &ast,
                    marshal::UPDATE_SETTING_FN,
                    (key.clone(), value.clone()),
                );
                if let Ok(rc) = &result {
                    if *rc == tidesh_plugin_abi::ResultCode::Success.as_raw() {
                        settings.set(&key, &value);
                    }
                }
                let _ = reply.send(result);
            }
            EngineCommand::Shutdown => break,
        }
    }
    // Scope, AST and engine drop here, on the thread that owns them.
}

/// Build the engine environment and wire the host functions scripts may
/// call back into.
fn build_engine(settings: &Arc<SettingStore>) -> Engine {
    let mut engine = Engine::new();

    // Scripts read configuration through `setting(key)` against the shared
    // store, so an accepted update is visible to the very next command.
    let store = Arc::clone(settings);
    engine.register_fn("setting", move |key: &str| -> String {
        store.get(key).unwrap_or_default()
    });
    let store = Arc::clone(settings);
    engine.register_fn("has_setting", move |key: &str| -> bool {
        store.get(key).is_some()
    });

    // `print` is the script's stdout channel to the shell user; `debug`
    // stays on the diagnostic stream.
    engine.on_print(|text| println!("{text}"));
    engine.on_debug(|text, source, pos| match source {
        Some(source) => tracing::debug!("script [{source}] @ {pos}: {text}"),
        None => tracing::debug!("script @ {pos}: {text}"),
    });

    engine
}

/// Load the script module, run its top-level statements once, and resolve
/// both required exports. Any failure here aborts the Starting transition.
fn load_and_verify(engine: &Engine, source: &str) -> Result<(AST, Scope<'static>)> {
    let ast = module_loader::load_module(engine, source)?;

    let mut scope = Scope::new();
    engine
        .run_ast_with_scope(&mut scope, &ast)
        .map_err(|err| PluginError::ScriptRuntime(err.to_string()))?;

    module_loader::resolve_export(&ast, marshal::HANDLE_COMMAND_FN, 1)?;
    module_loader::resolve_export(&ast, marshal::UPDATE_SETTING_FN, 2)?;

    Ok((ast, scope))
}

/// Call a script export and coerce its return value to a result code.
/// Exceptions raised inside the engine are caught here as `Err` values and
/// never cross into host control flow.
fn invoke_i32(
    engine: &Engine,
    scope: &mut Scope<'static>,
    ast: &AST,
    name: &str,
    args: impl rhai::FuncArgs,
) -> Result<i32> {
    // Top-level statements already ran at load time; do not replay them on
    // every call.
    let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
    let value: Dynamic = engine
        .call_fn_with_options(options, scope, ast, name, args)
        .map_err(|err| map_engine_error(name, *err))?;
    marshal::coerce_result(value)
}

fn map_engine_error(name: &str, err: rhai::EvalAltResult) -> PluginError {
    match err {
        rhai::EvalAltResult::ErrorFunctionNotFound(..) => PluginError::MissingExport(name.into()),
        other => PluginError::ScriptRuntime(other.to_string()),
    }
}
