//! The start-level controller
//!
//! A framework start level stages which modules run. Raising the level
//! starts eligible persistently-started modules in ascending level order;
//! lowering it stops in descending order. Changes run on a dedicated
//! single-worker thread, so their side effects are totally ordered.

use crossbeam::channel::{bounded, unbounded, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info};

use modulith_core::ModuleId;

use crate::events::{FrameworkEvent, FrameworkEventKind};
use crate::framework::{FrameworkInner, StartOptions, StopOptions};
use crate::module::Module;
use crate::refresh::CompletionHandle;
use crate::state::ModuleState;

enum LevelJob {
    Framework { target: u32, done: Sender<()> },
    Module { id: ModuleId },
}

/// Single-worker execution context for start-level changes
pub(crate) struct StartLevelWorker {
    tx: Option<Sender<LevelJob>>,
    handle: Option<JoinHandle<()>>,
}

impl StartLevelWorker {
    pub(crate) fn spawn(inner: Arc<FrameworkInner>) -> Self {
        let (tx, rx) = unbounded::<LevelJob>();
        let handle = std::thread::Builder::new()
            .name("modulith-startlevel".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    match job {
                        LevelJob::Framework { target, done } => {
                            inner.apply_framework_level(target);
                            let _ = done.send(());
                        }
                        LevelJob::Module { id } => inner.adjust_module_level(id),
                    }
                }
            })
            .expect("failed to spawn the start-level worker");
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    pub(crate) fn set_level(&self, target: u32) -> CompletionHandle {
        let (done, rx) = bounded(1);
        if let Some(tx) = &self.tx {
            let _ = tx.send(LevelJob::Framework { target, done });
        }
        CompletionHandle::new(rx, "start-level change")
    }

    pub(crate) fn adjust_module(&self, id: ModuleId) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(LevelJob::Module { id });
        }
    }
}

impl Drop for StartLevelWorker {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl FrameworkInner {
    /// Move the framework to a new start level; runs only on the
    /// start-level worker thread
    pub(crate) fn apply_framework_level(&self, target: u32) {
        let previous = self.swap_level(target);
        info!("Start level {} -> {}", previous, target);

        if target >= previous {
            let mut eligible: Vec<Arc<Module>> = self
                .modules
                .iter()
                .map(|e| e.value().clone())
                .filter(|m| !self.is_system(m.id()) && !m.is_fragment())
                .filter(|m| m.state() != ModuleState::Uninstalled && m.state() != ModuleState::Active)
                .filter(|m| m.record().persistently_started && m.start_level() <= target)
                .collect();
            eligible.sort_by(|a, b| {
                a.start_level()
                    .cmp(&b.start_level())
                    .then_with(|| a.id().cmp(&b.id()))
            });
            for module in &eligible {
                debug!("Start level reached for '{}'", module.name());
                if let Err(error) = self.start_module(module, StartOptions { transient: true }) {
                    self.events
                        .framework_event(FrameworkEvent::error(Some(module.id()), error.to_string()));
                }
            }
        } else {
            let mut running: Vec<Arc<Module>> = self
                .modules
                .iter()
                .map(|e| e.value().clone())
                .filter(|m| !self.is_system(m.id()))
                .filter(|m| m.state() == ModuleState::Active && m.start_level() > target)
                .collect();
            running.sort_by(|a, b| {
                b.start_level()
                    .cmp(&a.start_level())
                    .then_with(|| a.id().cmp(&b.id()))
            });
            for module in &running {
                debug!("Start level left behind '{}'", module.name());
                if let Err(error) = self.stop_module(module, StopOptions { transient: true }) {
                    self.events
                        .framework_event(FrameworkEvent::error(Some(module.id()), error.to_string()));
                }
            }
        }

        self.events.framework_event(FrameworkEvent {
            kind: FrameworkEventKind::StartLevelChanged,
            module: None,
            message: None,
        });
    }

    /// Bring one module in line with the framework level after its own
    /// level was reassigned
    pub(crate) fn adjust_module_level(&self, id: ModuleId) {
        let Some(module) = self.modules.get(&id).map(|m| m.clone()) else {
            return;
        };
        if self.is_system(id) || module.is_fragment() {
            return;
        }

        let level = module.start_level();
        let framework_level = self.level();
        if level <= framework_level
            && module.record().persistently_started
            && module.state() != ModuleState::Active
        {
            if let Err(error) = self.start_module(&module, StartOptions { transient: true }) {
                self.events
                    .framework_event(FrameworkEvent::error(Some(id), error.to_string()));
            }
        } else if level > framework_level && module.state() == ModuleState::Active {
            if let Err(error) = self.stop_module(&module, StopOptions { transient: true }) {
                self.events
                    .framework_event(FrameworkEvent::error(Some(id), error.to_string()));
            }
        }
    }
}
