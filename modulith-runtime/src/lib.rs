//! Modulith runtime
//!
//! The host side of the modulith system:
//! - Lifecycle controller: install, resolve, start, stop, uninstall, update
//! - Bounded-wait, method-tagged module and wiring locks
//! - Refresh orchestrator and start-level controller on dedicated workers
//! - Event dispatch and the storage/substrate boundary traits

pub mod config;
pub mod error;
pub mod events;
pub mod framework;
pub mod locking;
pub mod module;
pub mod refresh;
pub mod startlevel;
pub mod state;
pub mod storage;
pub mod substrate;

pub use config::FrameworkConfig;
pub use error::{FrameworkError, Result};
pub use events::{
    EventDispatcher, EventListener, FrameworkEvent, FrameworkEventKind, ModuleEvent,
    ModuleEventKind,
};
pub use framework::{Framework, FrameworkBuilder, StartOptions, StopOptions};
pub use locking::{BoundedLock, LockContext, OpTag};
pub use module::Module;
pub use refresh::CompletionHandle;
pub use state::{next_state, LifecycleOp, ModuleState};
pub use storage::{MemoryStore, ModuleRecord, StateStore};
pub use substrate::{
    ActivationContext, LoadedUnit, LoadingSubstrate, ModuleActivator, NullSubstrate,
};
