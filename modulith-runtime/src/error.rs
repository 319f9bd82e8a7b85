//! Framework error types

use modulith_core::{CoreError, ModuleId};
use modulith_resolver::ResolveError;
use thiserror::Error;

use crate::locking::OpTag;
use crate::state::ModuleState;

/// Type alias for framework results
pub type Result<T> = std::result::Result<T, FrameworkError>;

/// Errors that can occur driving the module lifecycle
#[derive(Error, Debug)]
pub enum FrameworkError {
    /// A lock could not be acquired within the bounded wait
    #[error("{method} timed out waiting for lock '{target}'")]
    LockTimeout {
        /// Name of the contended lock
        target: String,
        /// The operation that gave up
        method: OpTag,
        /// The operation holding the lock, when known
        held_by: Option<OpTag>,
    },

    /// Operation on a module that has been uninstalled
    #[error("Module '{name}' ({module}) has been uninstalled")]
    ModuleUninstalled {
        /// The uninstalled module
        module: ModuleId,
        /// Symbolic name of the module
        name: String,
    },

    /// The state machine does not allow the requested transition
    #[error("Module '{name}' cannot {method} while {state}")]
    InvalidState {
        /// Symbolic name of the module
        name: String,
        /// Current state
        state: ModuleState,
        /// The rejected operation
        method: OpTag,
    },

    /// Fragments have no lifecycle of their own
    #[error("Module '{name}' is a fragment and cannot be started or stopped")]
    FragmentLifecycle {
        /// Symbolic name of the fragment
        name: String,
    },

    /// A transient start was requested above the framework start level
    #[error("Start level of '{name}' is {level}, above the framework level {framework_level}")]
    StartLevelTooLow {
        /// Symbolic name of the module
        name: String,
        /// The module's assigned start level
        level: u32,
        /// The framework's current start level
        framework_level: u32,
    },

    /// The module's activation entry point failed
    #[error("Activator of '{name}' failed during {phase}: {source}")]
    ActivatorFailed {
        /// Symbolic name of the module
        name: String,
        /// `start` or `stop`
        phase: &'static str,
        /// The underlying failure
        #[source]
        source: anyhow::Error,
    },

    /// The class-loading substrate could not build a loadable unit
    #[error("Substrate failed to build unit for '{name}': {source}")]
    SubstrateFailed {
        /// Symbolic name of the module
        name: String,
        /// The underlying failure
        #[source]
        source: anyhow::Error,
    },

    /// Waiting on an asynchronous global operation timed out
    #[error("Timed out waiting for {operation} to complete")]
    WaitTimeout {
        /// The operation waited for
        operation: &'static str,
    },

    /// Resolution failure
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Consistency violation in the dependency model
    #[error(transparent)]
    Core(#[from] CoreError),
}
