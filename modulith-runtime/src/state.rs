//! Module lifecycle states and transitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a module
///
/// State is a property of the module, not of any one revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleState {
    /// Installed but not wired
    Installed,
    /// Wired into the dependency graph
    Resolved,
    /// Activation entry point running
    Starting,
    /// Running
    Active,
    /// Deactivation entry point running
    Stopping,
    /// Terminal
    Uninstalled,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleState::Installed => "INSTALLED",
            ModuleState::Resolved => "RESOLVED",
            ModuleState::Starting => "STARTING",
            ModuleState::Active => "ACTIVE",
            ModuleState::Stopping => "STOPPING",
            ModuleState::Uninstalled => "UNINSTALLED",
        };
        write!(f, "{name}")
    }
}

/// A lifecycle transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    /// Installed -> Resolved
    Resolve,
    /// Resolved -> Starting
    StartBegin,
    /// Starting -> Active
    StartCommit,
    /// Starting -> Resolved (activator failure)
    StartRevert,
    /// Active -> Stopping
    StopBegin,
    /// Stopping -> Resolved
    StopCommit,
    /// Resolved -> Installed (refresh unwire only)
    Unresolve,
    /// Any non-terminal state -> Uninstalled
    Uninstall,
}

/// The transition table: `current state x operation -> next state`
///
/// Returns `None` for transitions the state machine does not allow.
pub fn next_state(current: ModuleState, op: LifecycleOp) -> Option<ModuleState> {
    use LifecycleOp::*;
    use ModuleState::*;

    match (current, op) {
        (Installed, Resolve) => Some(Resolved),
        (Resolved, StartBegin) => Some(Starting),
        (Starting, StartCommit) => Some(Active),
        (Starting, StartRevert) => Some(Resolved),
        (Active, StopBegin) => Some(Stopping),
        (Stopping, StopCommit) => Some(Resolved),
        (Resolved, Unresolve) => Some(Installed),
        (Uninstalled, _) => None,
        (_, Uninstall) => Some(Uninstalled),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = ModuleState::Installed;
        for op in [
            LifecycleOp::Resolve,
            LifecycleOp::StartBegin,
            LifecycleOp::StartCommit,
            LifecycleOp::StopBegin,
            LifecycleOp::StopCommit,
        ] {
            state = next_state(state, op).unwrap();
        }
        assert_eq!(state, ModuleState::Resolved);
    }

    #[test]
    fn test_start_revert_returns_to_resolved() {
        assert_eq!(
            next_state(ModuleState::Starting, LifecycleOp::StartRevert),
            Some(ModuleState::Resolved)
        );
    }

    #[test]
    fn test_unresolve_only_from_resolved() {
        assert_eq!(
            next_state(ModuleState::Resolved, LifecycleOp::Unresolve),
            Some(ModuleState::Installed)
        );
        assert_eq!(next_state(ModuleState::Active, LifecycleOp::Unresolve), None);
    }

    #[test]
    fn test_uninstalled_is_terminal() {
        for op in [
            LifecycleOp::Resolve,
            LifecycleOp::StartBegin,
            LifecycleOp::Uninstall,
        ] {
            assert_eq!(next_state(ModuleState::Uninstalled, op), None);
        }
    }

    #[test]
    fn test_uninstall_reachable_from_any_non_terminal_state() {
        for state in [
            ModuleState::Installed,
            ModuleState::Resolved,
            ModuleState::Starting,
            ModuleState::Active,
            ModuleState::Stopping,
        ] {
            assert_eq!(
                next_state(state, LifecycleOp::Uninstall),
                Some(ModuleState::Uninstalled)
            );
        }
    }
}
