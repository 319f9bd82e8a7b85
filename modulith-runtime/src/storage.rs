//! Persistent module state boundary
//!
//! The lifecycle controller persists a small record per module on every
//! state change that must survive restart. The storage mechanism itself is
//! an external collaborator; [`MemoryStore`] is the in-process default.

use dashmap::DashMap;
use modulith_core::ModuleId;
use serde::{Deserialize, Serialize};

/// Per-module persisted state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Install location of the module
    pub location: String,
    /// Count of revisions installed over the module's lifetime
    pub revision_counter: u32,
    /// Assigned start level
    pub start_level: u32,
    /// Whether the module wants to be started when its level is reached
    pub persistently_started: bool,
    /// Whether the module was last started through its activation policy
    pub activation_policy_used: bool,
}

impl ModuleRecord {
    /// A fresh record for a newly installed module
    pub fn new(location: impl Into<String>, start_level: u32) -> Self {
        Self {
            location: location.into(),
            revision_counter: 1,
            start_level,
            persistently_started: false,
            activation_policy_used: false,
        }
    }
}

/// Supplier of persisted per-module state
///
/// Called synchronously by the lifecycle controller, always before the
/// module lock is released.
pub trait StateStore: Send + Sync {
    /// Load the record of a module, if one was saved
    fn load(&self, module: ModuleId) -> Option<ModuleRecord>;

    /// Save the record of a module
    fn save(&self, module: ModuleId, record: &ModuleRecord);

    /// Drop the record of an uninstalled module
    fn remove(&self, module: ModuleId);
}

/// In-memory state store
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<ModuleId, ModuleRecord>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, module: ModuleId) -> Option<ModuleRecord> {
        self.records.get(&module).map(|r| r.clone())
    }

    fn save(&self, module: ModuleId, record: &ModuleRecord) {
        self.records.insert(module, record.clone());
    }

    fn remove(&self, module: ModuleId) {
        self.records.remove(&module);
    }
}
