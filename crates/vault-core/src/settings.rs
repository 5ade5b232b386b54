//! Application settings
//!
//! A flat string map persisted inside the document. Settings stay readable
//! while the vault is locked. `vaultEnabled` is written only by the vault.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key of the vault flag in the settings map
pub const VAULT_ENABLED_KEY: &str = "vaultEnabled";

/// Defaults filled in for any missing key on load
const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("theme", "polar-dark"),
    ("fontSize", "13"),
    ("cursorStyle", "block"),
    ("shell", "powershell"),
    ("pingInterval", "60"),
    ("autoConnect", "false"),
    ("notifications", "true"),
    ("soundEnabled", "false"),
    ("autoReconnect", "true"),
    ("keepAliveInterval", "30"),
    ("scrollbackLines", "10000"),
    ("defaultView", "dashboard"),
];

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Insert defaults for missing keys. Returns true if anything was added.
    pub fn fill_defaults(&mut self) -> bool {
        let mut changed = false;
        for (key, value) in DEFAULT_SETTINGS {
            if !self.values.contains_key(*key) {
                self.values.insert((*key).to_string(), (*value).to_string());
                changed = true;
            }
        }
        changed
    }

    /// Get a setting value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Iterate over all settings
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether the vault flag is set
    pub fn vault_enabled(&self) -> bool {
        self.get(VAULT_ENABLED_KEY) == Some("true")
    }

    pub(crate) fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub(crate) fn set_vault_enabled(&mut self, enabled: bool) {
        self.set(VAULT_ENABLED_KEY, if enabled { "true" } else { "false" });
    }
}
