//! Lifecycle and framework event delivery
//!
//! The lifecycle controller and refresh orchestrator fire ordered events
//! into registered listeners. Delivery within one operation matches the
//! state-transition order exactly; a failing listener is reported and never
//! aborts the operation that triggered it.

use modulith_core::ModuleId;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// What happened to a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleEventKind {
    /// Module installed
    Installed,
    /// Module wired into the dependency graph
    Resolved,
    /// Module unwired during refresh
    Unresolved,
    /// Activation entry point about to run
    Starting,
    /// Module active
    Started,
    /// Deactivation entry point about to run
    Stopping,
    /// Module back to resolved
    Stopped,
    /// Replacement revision installed
    Updated,
    /// Module uninstalled
    Uninstalled,
}

/// A module lifecycle event
#[derive(Debug, Clone)]
pub struct ModuleEvent {
    /// What happened
    pub kind: ModuleEventKind,
    /// The module it happened to
    pub module: ModuleId,
    /// Symbolic name of the module
    pub name: String,
}

/// What happened to the framework
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkEventKind {
    /// A refresh completed
    PackagesRefreshed,
    /// The framework reached a new start level
    StartLevelChanged,
    /// An operation failed; the failure was captured, not propagated
    Error,
}

/// A framework-level event
#[derive(Debug, Clone)]
pub struct FrameworkEvent {
    /// What happened
    pub kind: FrameworkEventKind,
    /// The module involved, when one was
    pub module: Option<ModuleId>,
    /// Failure text for error events
    pub message: Option<String>,
}

impl FrameworkEvent {
    /// An error event for a module operation
    pub fn error(module: Option<ModuleId>, message: impl Into<String>) -> Self {
        Self {
            kind: FrameworkEventKind::Error,
            module,
            message: Some(message.into()),
        }
    }
}

/// Receiver of lifecycle and framework events
pub trait EventListener: Send + Sync {
    /// A module changed state
    fn on_module_event(&self, _event: &ModuleEvent) {}

    /// A framework-level operation completed or failed
    fn on_framework_event(&self, _event: &FrameworkEvent) {}
}

/// Dispatches events to registered listeners, in registration order
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventDispatcher {
    /// Create a dispatcher with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn register(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().push(listener);
    }

    /// Deliver a module event to every listener
    pub fn module_event(&self, kind: ModuleEventKind, module: ModuleId, name: &str) {
        let event = ModuleEvent {
            kind,
            module,
            name: name.to_string(),
        };
        for listener in self.listeners.read().iter() {
            if catch_unwind(AssertUnwindSafe(|| listener.on_module_event(&event))).is_err() {
                warn!("Listener panicked delivering {:?} for '{}'", event.kind, event.name);
            }
        }
    }

    /// Deliver a framework event to every listener
    pub fn framework_event(&self, event: FrameworkEvent) {
        for listener in self.listeners.read().iter() {
            if catch_unwind(AssertUnwindSafe(|| listener.on_framework_event(&event))).is_err() {
                warn!("Listener panicked delivering {:?}", event.kind);
            }
        }
    }
}
