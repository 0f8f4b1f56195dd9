// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! End-to-end tests of the engine bridge: lifecycle transitions, marshaling
//! round-trips, setting visibility, and serialization of concurrent callers.

use std::sync::Arc;

use tidesh_script_runtime::{BridgeState, PluginError, ScriptBridge, SettingStore};

/// Command surface used by most tests: result codes are driven by the
/// invocation so every caller can predict its own reply.
const SCRIPT: &str = r#"
fn handleCommand(args) {
    if args.len() == 0 {
        return -2;
    }
    let cmd = args[0];
    if cmd == "ok" {
        return 0;
    }
    if cmd == "code" {
        return parse_int(args[1]);
    }
    if cmd == "greetlen" {
        return setting("greeting").len();
    }
    if cmd == "boom" {
        throw "deliberate failure";
    }
    if cmd == "text" {
        return "not a number";
    }
    -2
}

fn updateSetting(key, value) {
    if key == "greeting" {
        if value == "" {
            return -2;
        }
        return 0;
    }
    -2
}
"#;

fn started_bridge() -> ScriptBridge {
    let settings = Arc::new(SettingStore::new([("greeting", "Hello")]));
    let mut bridge = ScriptBridge::new(settings);
    bridge.start(SCRIPT).expect("bridge should start");
    bridge
}

#[test]
fn test_start_reaches_running() {
    let mut bridge = started_bridge();
    assert_eq!(bridge.state(), BridgeState::Running);
    bridge.stop().unwrap();
    assert_eq!(bridge.state(), BridgeState::Stopped);
}

#[test]
fn test_handler_result_codes_round_trip() {
    let mut bridge = started_bridge();

    assert_eq!(bridge.handle_command(vec!["ok".into()]).unwrap(), 0);
    assert_eq!(
        bridge
            .handle_command(vec!["code".into(), "7".into()])
            .unwrap(),
        7
    );
    assert_eq!(
        bridge
            .handle_command(vec!["code".into(), "-3".into()])
            .unwrap(),
        -3
    );
    // The script's own invalid-args convention passes through verbatim.
    assert_eq!(bridge.handle_command(vec!["unknown".into()]).unwrap(), -2);

    bridge.stop().unwrap();
}

#[test]
fn test_setting_update_is_visible_to_next_command() {
    let mut bridge = started_bridge();

    // Default greeting is "Hello", five characters.
    assert_eq!(bridge.handle_command(vec!["greetlen".into()]).unwrap(), 5);

    assert_eq!(bridge.update_setting("greeting", "hi").unwrap(), 0);
    assert_eq!(bridge.handle_command(vec!["greetlen".into()]).unwrap(), 2);

    bridge.stop().unwrap();
}

#[test]
fn test_rejected_update_leaves_store_unchanged() {
    let settings = Arc::new(SettingStore::new([("greeting", "Hello")]));
    let mut bridge = ScriptBridge::new(Arc::clone(&settings));
    bridge.start(SCRIPT).unwrap();

    assert_eq!(bridge.update_setting("volume", "11").unwrap(), -2);
    assert_eq!(settings.get("volume"), None);

    // Value-level rejection: empty greeting is refused by the script.
    assert_eq!(bridge.update_setting("greeting", "").unwrap(), -2);
    assert_eq!(settings.get("greeting").as_deref(), Some("Hello"));

    bridge.stop().unwrap();
}

#[test]
fn test_accepted_update_writes_store() {
    let settings = Arc::new(SettingStore::new([("greeting", "Hello")]));
    let mut bridge = ScriptBridge::new(Arc::clone(&settings));
    bridge.start(SCRIPT).unwrap();

    assert_eq!(bridge.update_setting("greeting", "hey").unwrap(), 0);
    assert_eq!(settings.get("greeting").as_deref(), Some("hey"));

    bridge.stop().unwrap();
}

#[test]
fn test_script_exception_is_an_error_not_a_crash() {
    let mut bridge = started_bridge();

    let err = bridge.handle_command(vec!["boom".into()]).unwrap_err();
    match err {
        PluginError::ScriptRuntime(diag) => assert!(diag.contains("deliberate failure")),
        other => panic!("expected ScriptRuntime, got {other:?}"),
    }

    // The engine survives the exception and keeps serving commands.
    assert_eq!(bridge.handle_command(vec!["ok".into()]).unwrap(), 0);

    bridge.stop().unwrap();
}

#[test]
fn test_non_integer_return_is_a_coercion_failure() {
    let mut bridge = started_bridge();

    let err = bridge.handle_command(vec!["text".into()]).unwrap_err();
    assert!(matches!(err, PluginError::TypeCoercion(_)));

    bridge.stop().unwrap();
}

#[test]
fn test_operations_fail_outside_running() {
    let settings = Arc::new(SettingStore::new([("greeting", "Hello")]));
    let mut bridge = ScriptBridge::new(settings);

    // Unstarted.
    assert!(matches!(
        bridge.handle_command(vec!["ok".into()]).unwrap_err(),
        PluginError::NotRunning
    ));

    bridge.start(SCRIPT).unwrap();
    bridge.stop().unwrap();

    // Stopped.
    assert!(matches!(
        bridge.handle_command(vec!["ok".into()]).unwrap_err(),
        PluginError::NotRunning
    ));
    assert!(matches!(
        bridge.update_setting("greeting", "hi").unwrap_err(),
        PluginError::NotRunning
    ));
}

#[test]
fn test_compile_failure_aborts_startup() {
    let mut bridge = ScriptBridge::new(Arc::new(SettingStore::default()));
    let err = bridge.start("fn handleCommand( {").unwrap_err();
    assert!(matches!(err, PluginError::ScriptCompile(_)));
    assert_eq!(bridge.state(), BridgeState::Stopped);
}

#[test]
fn test_load_time_exception_aborts_startup() {
    let source = r#"
        throw "exploding on load";
        fn handleCommand(args) { 0 }
        fn updateSetting(key, value) { 0 }
    "#;
    let mut bridge = ScriptBridge::new(Arc::new(SettingStore::default()));
    let err = bridge.start(source).unwrap_err();
    match err {
        PluginError::ScriptRuntime(diag) => assert!(diag.contains("exploding on load")),
        other => panic!("expected ScriptRuntime, got {other:?}"),
    }
    assert_eq!(bridge.state(), BridgeState::Stopped);
}

#[test]
fn test_missing_export_aborts_startup() {
    let mut bridge = ScriptBridge::new(Arc::new(SettingStore::default()));
    let err = bridge.start("fn handleCommand(args) { 0 }").unwrap_err();
    assert!(matches!(err, PluginError::MissingExport(name) if name == "updateSetting"));
    assert_eq!(bridge.state(), BridgeState::Stopped);
}

#[test]
fn test_concurrent_callers_get_their_own_results() {
    let bridge = started_bridge();

    std::thread::scope(|scope| {
        for code in 0..8 {
            let bridge = &bridge;
            scope.spawn(move || {
                for _ in 0..10 {
                    let rc = bridge
                        .handle_command(vec!["code".to_string(), code.to_string()])
                        .unwrap();
                    assert_eq!(rc, code, "reply delivered to the wrong caller");
                }
            });
        }
    });

    let mut bridge = bridge;
    bridge.stop().unwrap();
}

#[test]
fn test_drop_without_stop_joins_the_engine_thread() {
    let bridge = started_bridge();
    assert_eq!(bridge.state(), BridgeState::Running);
    // Dropping the bridge must not leak the engine thread; Drop stops and
    // joins. Nothing to assert beyond "this returns".
    drop(bridge);
}
