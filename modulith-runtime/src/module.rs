//! Runtime module handle
//!
//! A module is the long-lived identity behind a sequence of revisions. Its
//! lifecycle state, lock and persisted record live here; the revisions
//! themselves live in the shared environment.

use modulith_core::{ModuleId, Revision};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::error::{FrameworkError, Result};
use crate::locking::{BoundedLock, OpTag};
use crate::state::{next_state, LifecycleOp, ModuleState};
use crate::storage::ModuleRecord;
use crate::substrate::{LoadedUnit, ModuleActivator};

/// A module managed by the framework
pub struct Module {
    id: ModuleId,
    name: String,
    state: RwLock<ModuleState>,
    revisions: RwLock<Vec<Arc<Revision>>>,
    record: RwLock<ModuleRecord>,
    pub(crate) lock: BoundedLock,
    pub(crate) unit: RwLock<Option<Arc<dyn LoadedUnit>>>,
    pub(crate) activator: Mutex<Option<Box<dyn ModuleActivator>>>,
}

impl Module {
    pub(crate) fn new(id: ModuleId, revision: Arc<Revision>, record: ModuleRecord) -> Self {
        let name = revision.symbolic_name().to_string();
        Self {
            id,
            lock: BoundedLock::new(format!("module {name}")),
            name,
            state: RwLock::new(ModuleState::Installed),
            revisions: RwLock::new(vec![revision]),
            record: RwLock::new(record),
            unit: RwLock::new(None),
            activator: Mutex::new(None),
        }
    }

    /// Stable module id
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Symbolic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> ModuleState {
        *self.state.read()
    }

    /// The current (most recently installed) revision
    pub fn current_revision(&self) -> Arc<Revision> {
        self.revisions
            .read()
            .last()
            .cloned()
            .expect("a module always owns at least one revision")
    }

    /// All revisions, oldest first
    pub fn revisions(&self) -> Vec<Arc<Revision>> {
        self.revisions.read().clone()
    }

    /// Whether the current revision is a fragment
    pub fn is_fragment(&self) -> bool {
        self.current_revision().is_fragment()
    }

    /// Assigned start level
    pub fn start_level(&self) -> u32 {
        self.record.read().start_level
    }

    /// Copy of the persisted record
    pub fn record(&self) -> ModuleRecord {
        self.record.read().clone()
    }

    pub(crate) fn update_record<F: FnOnce(&mut ModuleRecord)>(&self, f: F) -> ModuleRecord {
        let mut record = self.record.write();
        f(&mut record);
        record.clone()
    }

    pub(crate) fn push_revision(&self, revision: Arc<Revision>) {
        self.revisions.write().push(revision);
    }

    /// Drop every revision but the current one; returns the dropped ones
    pub(crate) fn retain_current_revision(&self) -> Vec<Arc<Revision>> {
        let mut revisions = self.revisions.write();
        let keep = revisions.len().saturating_sub(1);
        revisions.drain(..keep).collect()
    }

    /// Apply a lifecycle transition through the state table
    ///
    /// Rejecting an impossible transition is a consistency check; callers
    /// validate state under the module lock before mutating.
    pub(crate) fn transition(&self, op: LifecycleOp, method: OpTag) -> Result<ModuleState> {
        let mut state = self.state.write();
        match next_state(*state, op) {
            Some(next) => {
                tracing::debug!("Module '{}': {} -> {}", self.name, *state, next);
                *state = next;
                Ok(next)
            }
            None if *state == ModuleState::Uninstalled => Err(FrameworkError::ModuleUninstalled {
                module: self.id,
                name: self.name.clone(),
            }),
            None => Err(FrameworkError::InvalidState {
                name: self.name.clone(),
                state: *state,
                method,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::OpTag;
    use modulith_core::{Environment, RevisionMetadata};
    use semver::Version;

    fn module() -> Module {
        let env = Environment::new();
        let metadata = RevisionMetadata::builder("m", Version::new(1, 0, 0))
            .build()
            .unwrap();
        let revision = env.install(ModuleId(1), metadata);
        Module::new(ModuleId(1), revision, ModuleRecord::new("file:/m", 1))
    }

    #[test]
    fn test_transition_follows_table() {
        let m = module();
        assert_eq!(m.state(), ModuleState::Installed);
        m.transition(LifecycleOp::Resolve, OpTag::Resolve).unwrap();
        assert_eq!(m.state(), ModuleState::Resolved);
    }

    #[test]
    fn test_invalid_transition_reports_state_and_method() {
        let m = module();
        let error = m.transition(LifecycleOp::StartCommit, OpTag::Start).unwrap_err();
        assert!(matches!(error, FrameworkError::InvalidState { .. }));
        assert_eq!(m.state(), ModuleState::Installed);
    }

    #[test]
    fn test_transition_on_uninstalled_module_is_loud() {
        let m = module();
        m.transition(LifecycleOp::Uninstall, OpTag::Uninstall).unwrap();
        let error = m.transition(LifecycleOp::Resolve, OpTag::Resolve).unwrap_err();
        assert!(matches!(error, FrameworkError::ModuleUninstalled { .. }));
    }
}
