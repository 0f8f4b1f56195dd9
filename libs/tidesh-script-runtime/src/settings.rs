// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-plugin setting storage.
//!
//! The store holds the plugin's declared defaults plus the current values.
//! It is the only state shared across threads without affinity restrictions:
//! the host thread writes through `plugin_update_setting` while the engine
//! thread reads during command execution, so access goes through a lock.
//!
//! Semantic validation (unknown key, rejected value) belongs to the script's
//! `updateSetting` export; the store is only written after the script
//! accepts an update, which keeps rejected updates from ever mutating it.

use std::collections::HashMap;

use parking_lot::RwLock;

pub struct SettingStore {
    defaults: Vec<(String, String)>,
    values: RwLock<HashMap<String, String>>,
}

impl Default for SettingStore {
    /// An empty store: no declared defaults, no current values.
    fn default() -> Self {
        let no_defaults: [(&str, &str); 0] = [];
        Self::new(no_defaults)
    }
}

impl SettingStore {
    /// Build a store initialized from the plugin's declared defaults.
    pub fn new<'a, I>(defaults: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let defaults: Vec<(String, String)> = defaults
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let values = defaults.iter().cloned().collect();
        Self {
            defaults,
            values: RwLock::new(values),
        }
    }

    /// Current value for `key`, or `None` if the key was never declared nor
    /// accepted by an update.
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// Insert or overwrite `key`. Keys are never removed.
    ///
    /// Callers are expected to have validated the update first; the bridge
    /// only writes here after the script's `updateSetting` accepted it.
    pub fn set(&self, key: &str, value: &str) {
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
    }

    /// Whether `key` appears in the declared defaults.
    pub fn is_declared(&self, key: &str) -> bool {
        self.defaults.iter().any(|(k, _)| k == key)
    }

    /// The declared defaults, in declaration order.
    pub fn defaults(&self) -> &[(String, String)] {
        &self.defaults
    }

    /// Copy of the current key/value map.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values.read().clone()
    }
}
