//! The refresh orchestrator
//!
//! Refresh recomputes the dependency graph after updates and uninstalls:
//! stop every affected module in descending start-level order, unwire and
//! re-resolve under the wiring lock, then restart in ascending order. It
//! runs on a dedicated single-worker thread so overlapping requests
//! serialize and their stop/start phases never interleave.

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

use modulith_core::{ModuleId, RevisionId};

use crate::error::{FrameworkError, Result};
use crate::events::{FrameworkEvent, FrameworkEventKind, ModuleEventKind};
use crate::framework::{FrameworkInner, StartOptions, StopOptions};
use crate::locking::{LockContext, OpTag};
use crate::module::Module;
use crate::state::{LifecycleOp, ModuleState};

/// Future-like handle on an asynchronous global operation
///
/// The wait bound is the caller's own; it is distinct from the per-module
/// lock timeout.
pub struct CompletionHandle {
    rx: Receiver<()>,
    operation: &'static str,
}

impl CompletionHandle {
    pub(crate) fn new(rx: Receiver<()>, operation: &'static str) -> Self {
        Self { rx, operation }
    }

    /// Block until the operation completes, or fail after `timeout`
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        self.rx
            .recv_timeout(timeout)
            .map_err(|_| FrameworkError::WaitTimeout {
                operation: self.operation,
            })
    }
}

struct RefreshJob {
    targets: Option<Vec<ModuleId>>,
    done: Sender<()>,
}

/// Single-worker execution context for refresh requests
pub(crate) struct RefreshWorker {
    tx: Option<Sender<RefreshJob>>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshWorker {
    pub(crate) fn spawn(inner: Arc<FrameworkInner>) -> Self {
        let (tx, rx) = unbounded::<RefreshJob>();
        let handle = std::thread::Builder::new()
            .name("modulith-refresh".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    inner.refresh_once(job.targets);
                    let _ = job.done.send(());
                }
            })
            .expect("failed to spawn the refresh worker");
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    pub(crate) fn enqueue(&self, targets: Option<Vec<ModuleId>>) -> CompletionHandle {
        let (done, rx) = bounded(1);
        if let Some(tx) = &self.tx {
            let _ = tx.send(RefreshJob { targets, done });
        }
        CompletionHandle::new(rx, "refresh")
    }
}

impl Drop for RefreshWorker {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl FrameworkInner {
    /// One refresh pass; runs only on the refresh worker thread
    pub(crate) fn refresh_once(&self, targets: Option<Vec<ModuleId>>) {
        let seeds: Vec<Arc<Module>> = match targets {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.modules.get(id).map(|m| m.clone()))
                .filter(|m| !self.is_system(m.id()))
                .collect(),
            None => self
                .modules
                .iter()
                .map(|e| e.value().clone())
                .filter(|m| !self.is_system(m.id()))
                .filter(|m| m.revisions().len() > 1 || m.state() == ModuleState::Uninstalled)
                .collect(),
        };

        if seeds.is_empty() {
            self.events.framework_event(FrameworkEvent {
                kind: FrameworkEventKind::PackagesRefreshed,
                module: None,
                message: None,
            });
            return;
        }

        let affected = self.refresh_closure(&seeds);
        info!("Refreshing {} modules ({} seeds)", affected.len(), seeds.len());

        // Stop phase: higher start levels first.
        let mut stopped: Vec<Arc<Module>> = affected
            .iter()
            .filter(|m| matches!(m.state(), ModuleState::Active | ModuleState::Starting))
            .cloned()
            .collect();
        stopped.sort_by(|a, b| {
            b.start_level()
                .cmp(&a.start_level())
                .then_with(|| a.id().cmp(&b.id()))
        });
        for module in &stopped {
            if let Err(error) = self.stop_module(module, StopOptions { transient: true }) {
                self.events
                    .framework_event(FrameworkEvent::error(Some(module.id()), error.to_string()));
            }
        }

        if let Err(error) = self.rewire(&affected) {
            self.events
                .framework_event(FrameworkEvent::error(None, error.to_string()));
        }

        // Restart phase mirrors the stop order: lower start levels first.
        // The persisted started flag decides who comes back.
        let mut restart = stopped;
        restart.sort_by(|a, b| {
            a.start_level()
                .cmp(&b.start_level())
                .then_with(|| a.id().cmp(&b.id()))
        });
        for module in &restart {
            if module.state() == ModuleState::Uninstalled {
                continue;
            }
            if !module.record().persistently_started {
                continue;
            }
            if let Err(error) = self.start_module(module, StartOptions { transient: true }) {
                self.events
                    .framework_event(FrameworkEvent::error(Some(module.id()), error.to_string()));
            }
        }

        self.events.framework_event(FrameworkEvent {
            kind: FrameworkEventKind::PackagesRefreshed,
            module: None,
            message: None,
        });
    }

    /// Transitive closure of modules whose current wiring depends on a
    /// module being refreshed, plus fragment/host pairs
    fn refresh_closure(&self, seeds: &[Arc<Module>]) -> Vec<Arc<Module>> {
        let mut affected: FxHashSet<ModuleId> = seeds.iter().map(|m| m.id()).collect();

        loop {
            let mut changed = false;

            for wiring in self.env.wirings() {
                let Ok(importer) = self.env.revision(wiring.revision) else {
                    continue;
                };
                if affected.contains(&importer.module()) {
                    continue;
                }
                let depends = wiring.required.iter().any(|wire| {
                    self.env
                        .revision(wire.exporter)
                        .map(|r| affected.contains(&r.module()))
                        .unwrap_or(false)
                });
                if depends && !self.is_system(importer.module()) {
                    affected.insert(importer.module());
                    changed = true;
                }
            }

            // Refreshing a fragment rewires its host.
            for id in affected.clone() {
                let Some(module) = self.modules.get(&id).map(|m| m.clone()) else {
                    continue;
                };
                for revision in module.revisions() {
                    if let Some(host) = self.env.host_of(revision.id()) {
                        if let Ok(host_rev) = self.env.revision(host) {
                            if !self.is_system(host_rev.module())
                                && affected.insert(host_rev.module())
                            {
                                changed = true;
                            }
                        }
                    }
                }
            }

            if !changed {
                break;
            }
        }

        let mut modules: Vec<Arc<Module>> = affected
            .iter()
            .filter_map(|id| self.modules.get(id).map(|m| m.clone()))
            .collect();
        modules.sort_by_key(|m| m.id());
        modules
    }

    /// The unwire/re-resolve window: wiring lock plus every affected module
    /// lock, held only for this window
    fn rewire(&self, affected: &[Arc<Module>]) -> Result<()> {
        let timeout = self.config.lock_timeout();
        let mut ctx = LockContext::new();
        ctx.push(self.wiring_lock.acquire(OpTag::Refresh, timeout)?);
        for module in affected {
            ctx.push(module.lock.acquire(OpTag::Refresh, timeout)?);
        }

        // Fully uninstalled modules disappear here, revisions and all.
        for module in affected {
            if module.state() != ModuleState::Uninstalled {
                continue;
            }
            for revision in module.revisions() {
                self.env.clear_wiring(revision.id());
                self.env.detach_fragment(revision.id());
                if self.env.is_live(revision.id()) {
                    let _ = self.env.retire(revision.id());
                }
                self.substrate.discard(revision.id());
            }
            debug!("Dropping uninstalled module '{}'", module.name());
            self.modules.remove(&module.id());
        }

        // Unwire the survivors: old revisions go away, the current revision
        // loses its wiring, states fall back to INSTALLED.
        let survivors: Vec<&Arc<Module>> = affected
            .iter()
            .filter(|m| m.state() != ModuleState::Uninstalled)
            .collect();
        for module in &survivors {
            for old in module.retain_current_revision() {
                self.env.clear_wiring(old.id());
                self.env.detach_fragment(old.id());
                if self.env.is_live(old.id()) {
                    let _ = self.env.retire(old.id());
                }
                self.substrate.discard(old.id());
            }

            let current = module.current_revision();
            self.env.clear_wiring(current.id());
            self.env.detach_fragment(current.id());
            self.substrate.discard(current.id());
            *module.unit.write() = None;
            *module.activator.lock() = None;

            if module.state() == ModuleState::Resolved {
                module.transition(LifecycleOp::Unresolve, OpTag::Refresh)?;
                self.events
                    .module_event(ModuleEventKind::Unresolved, module.id(), module.name());
            }
        }

        self.env.purge_unreferenced();

        let targets: Vec<RevisionId> = survivors
            .iter()
            .map(|m| m.current_revision().id())
            .collect();
        self.resolve_locked(&targets)?;
        Ok(())
    }
}
