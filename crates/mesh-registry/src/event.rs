//! Change events emitted by config stores.

use std::fmt;
use std::sync::Arc;

use mesh_core::Config;

/// The kind of change a store observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigEvent {
    /// Object created.
    Add,
    /// Object modified.
    Update,
    /// Object removed.
    Delete,
}

impl fmt::Display for ConfigEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigEvent::Add => f.write_str("add"),
            ConfigEvent::Update => f.write_str("update"),
            ConfigEvent::Delete => f.write_str("delete"),
        }
    }
}

/// Callback invoked synchronously from the store's task when an object of
/// a registered kind changes.
///
/// Handlers must be fast and non-blocking; they typically enqueue a push
/// request to the debouncer and return.
pub type EventHandler = Arc<dyn Fn(&Config, ConfigEvent) + Send + Sync>;
