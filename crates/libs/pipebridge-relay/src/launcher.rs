//! Tool launchers supplied by the peer process.
//!
//! Context-data messages carry an ordered list of launcher descriptors;
//! the host renders them as menu entries. The registry is rebuilt in full
//! on every context-data message, never merged incrementally.

use pipebridge_proto::topics::RUN_DIALOG_TOPIC;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dispatch::Outbound;

/// One clickable tool entry described by the remote peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Launcher {
    pub name: String,
    pub label: String,
    pub dialog_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

/// Ordered registry of the launchers most recently received.
#[derive(Debug, Default, Clone)]
pub struct LauncherRegistry {
    launchers: Vec<Launcher>,
}

impl LauncherRegistry {
    /// Replace the full registry with *launchers*.
    pub fn replace_all(&mut self, launchers: Vec<Launcher>) {
        log::info!("launchers: rebuilt registry with {} entries", launchers.len());
        self.launchers = launchers;
    }

    pub fn get(&self, name: &str) -> Option<&Launcher> {
        self.launchers.iter().find(|launcher| launcher.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Launcher> {
        self.launchers.iter()
    }

    pub fn len(&self) -> usize {
        self.launchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.launchers.is_empty()
    }

    /// Build the run-dialog message for the launcher named *name*, carrying
    /// its dialog name and tool configuration. Unknown names are logged and
    /// produce nothing.
    pub fn launch_tool(&self, name: &str) -> Option<Outbound> {
        let Some(launcher) = self.get(name) else {
            log::warn!("launchers: no launcher named {name:?}");
            return None;
        };
        let mut data = Map::new();
        data.insert("name".to_string(), Value::String(launcher.name.clone()));
        data.insert(
            "dialog_name".to_string(),
            Value::String(launcher.dialog_name.clone()),
        );
        data.insert(
            "tool_configs".to_string(),
            launcher.options.get("tool_configs").cloned().unwrap_or(Value::Null),
        );
        Some(Outbound::message(RUN_DIALOG_TOPIC, data))
    }
}
