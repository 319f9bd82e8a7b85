//! The framework: lifecycle controller over the shared environment
//!
//! Install, resolve, start, stop, uninstall and update run here, each
//! guarded by the owning module's bounded lock. Writes to the dependency
//! environment happen only under the framework-wide wiring lock, which is
//! always acquired before any module lock within one operation.

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use semver::Version;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use modulith_core::{
    Environment, ModuleId, RevisionId, RevisionMetadata, Wiring,
};
use modulith_resolver::{
    Platform, ResolveError, ResolveMode, Resolver, WiringEmitter,
};

use crate::config::FrameworkConfig;
use crate::error::{FrameworkError, Result};
use crate::events::{EventDispatcher, EventListener, FrameworkEvent, ModuleEventKind};
use crate::locking::{BoundedLock, LockContext, OpTag};
use crate::module::Module;
use crate::refresh::{CompletionHandle, RefreshWorker};
use crate::startlevel::StartLevelWorker;
use crate::state::{LifecycleOp, ModuleState};
use crate::storage::{MemoryStore, ModuleRecord, StateStore};
use crate::substrate::{ActivationContext, LoadingSubstrate, NullSubstrate};

/// Options for [`Framework::start`]
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Start now or fail; do not persist the wish to be started
    pub transient: bool,
}

/// Options for [`Framework::stop`]
#[derive(Debug, Clone, Copy, Default)]
pub struct StopOptions {
    /// Do not persist "does not want to be started"
    pub transient: bool,
}

/// Builder for a framework instance
pub struct FrameworkBuilder {
    config: FrameworkConfig,
    store: Arc<dyn StateStore>,
    substrate: Arc<dyn LoadingSubstrate>,
}

impl FrameworkBuilder {
    /// Start from a configuration
    pub fn new(config: FrameworkConfig) -> Self {
        Self {
            config,
            store: Arc::new(MemoryStore::new()),
            substrate: Arc::new(NullSubstrate),
        }
    }

    /// Use a persistent state store
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    /// Use a class-loading substrate
    pub fn substrate(mut self, substrate: Arc<dyn LoadingSubstrate>) -> Self {
        self.substrate = substrate;
        self
    }

    /// Build and boot the framework
    pub fn build(self) -> Result<Framework> {
        Framework::assemble(self.config, self.store, self.substrate)
    }
}

/// The modulith host process
pub struct Framework {
    inner: Arc<FrameworkInner>,
    refresh: RefreshWorker,
    levels: StartLevelWorker,
}

impl Framework {
    /// Boot a framework with in-memory storage and an inert substrate
    pub fn new(config: FrameworkConfig) -> Result<Self> {
        FrameworkBuilder::new(config).build()
    }

    /// Start building a framework with explicit collaborators
    pub fn builder(config: FrameworkConfig) -> FrameworkBuilder {
        FrameworkBuilder::new(config)
    }

    fn assemble(
        config: FrameworkConfig,
        store: Arc<dyn StateStore>,
        substrate: Arc<dyn LoadingSubstrate>,
    ) -> Result<Self> {
        let inner = Arc::new(FrameworkInner::new(config, store, substrate)?);
        let refresh = RefreshWorker::spawn(inner.clone());
        let levels = StartLevelWorker::spawn(inner.clone());
        info!("Framework booted at start level {}", inner.level());
        Ok(Self {
            inner,
            refresh,
            levels,
        })
    }

    /// The shared dependency environment
    pub fn environment(&self) -> &Environment {
        &self.inner.env
    }

    /// Register an event listener
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.inner.events.register(listener);
    }

    /// Install a module from parsed metadata
    pub fn install(&self, location: &str, metadata: RevisionMetadata) -> Result<Arc<Module>> {
        self.inner.install(location, metadata)
    }

    /// Look up a module by id; uninstalled modules remain addressable until
    /// a refresh purges them
    pub fn module(&self, id: ModuleId) -> Option<Arc<Module>> {
        self.inner.modules.get(&id).map(|m| m.clone())
    }

    /// Look up a module by symbolic name
    pub fn find_module(&self, name: &str) -> Option<Arc<Module>> {
        self.modules().into_iter().find(|m| m.name() == name)
    }

    /// All modules, ordered by id
    pub fn modules(&self) -> Vec<Arc<Module>> {
        let mut modules: Vec<Arc<Module>> =
            self.inner.modules.iter().map(|e| e.value().clone()).collect();
        modules.sort_by_key(|m| m.id());
        modules
    }

    /// Resolve a batch of modules, best effort
    ///
    /// Returns whether every target resolved; per-module failure reasons are
    /// reported as framework error events.
    pub fn resolve_modules(&self, ids: &[ModuleId]) -> Result<bool> {
        self.inner.resolve_modules(ids)
    }

    /// Resolve a single module, strict
    pub fn resolve_module(&self, id: ModuleId) -> Result<()> {
        self.inner.resolve_module(id)
    }

    /// Start a module
    pub fn start(&self, id: ModuleId, options: StartOptions) -> Result<()> {
        let module = self.inner.require_module(id)?;
        self.inner.start_module(&module, options)
    }

    /// Stop a module
    pub fn stop(&self, id: ModuleId, options: StopOptions) -> Result<()> {
        let module = self.inner.require_module(id)?;
        self.inner.stop_module(&module, options)
    }

    /// Uninstall a module
    pub fn uninstall(&self, id: ModuleId) -> Result<()> {
        let module = self.inner.require_module(id)?;
        self.inner.uninstall_module(&module)
    }

    /// Install a replacement revision; the old wiring stays in use until a
    /// refresh
    pub fn update(&self, id: ModuleId, metadata: RevisionMetadata) -> Result<()> {
        let module = self.inner.require_module(id)?;
        self.inner.update_module(&module, metadata)
    }

    /// Queue a refresh of the given modules, or of every module with an old
    /// revision or in the uninstalled state when none are given
    pub fn refresh(&self, targets: Option<Vec<ModuleId>>) -> CompletionHandle {
        self.refresh.enqueue(targets)
    }

    /// The framework's current start level
    pub fn start_level(&self) -> u32 {
        self.inner.level()
    }

    /// Queue a framework start-level change
    pub fn set_start_level(&self, level: u32) -> CompletionHandle {
        self.levels.set_level(level)
    }

    /// Assign a module's start level and queue the matching adjustment
    pub fn set_module_start_level(&self, id: ModuleId, level: u32) -> Result<()> {
        let module = self.inner.require_module(id)?;
        {
            let _guard = module
                .lock
                .acquire(OpTag::StartLevel, self.inner.config.lock_timeout())?;
            let record = module.update_record(|r| r.start_level = level);
            self.inner.store.save(id, &record);
        }
        self.levels.adjust_module(id);
        Ok(())
    }
}

pub(crate) struct FrameworkInner {
    pub(crate) config: FrameworkConfig,
    pub(crate) env: Environment,
    pub(crate) platform: Platform,
    pub(crate) modules: DashMap<ModuleId, Arc<Module>>,
    pub(crate) events: EventDispatcher,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) substrate: Arc<dyn LoadingSubstrate>,
    pub(crate) wiring_lock: BoundedLock,
    system: ModuleId,
    next_module: AtomicU64,
    level: AtomicU32,
}

impl FrameworkInner {
    fn new(
        config: FrameworkConfig,
        store: Arc<dyn StateStore>,
        substrate: Arc<dyn LoadingSubstrate>,
    ) -> Result<Self> {
        let env = Environment::new();
        let platform = config.platform.clone().unwrap_or_else(Platform::current);
        let version = Version::parse(env!("CARGO_PKG_VERSION"))
            .unwrap_or_else(|_| Version::new(0, 0, 0));

        let mut builder = RevisionMetadata::builder("system", version.clone());
        for package in &config.system_packages {
            builder = builder.export_package(package.clone(), version.clone());
        }
        let metadata = builder.build()?;

        let system_id = ModuleId(0);
        let revision = env.install(system_id, metadata);
        env.set_system(revision.id());
        env.set_wiring(Wiring::new(revision.id()))?;

        let system = Arc::new(Module::new(
            system_id,
            revision,
            ModuleRecord::new("system", 0),
        ));
        system.transition(LifecycleOp::Resolve, OpTag::Resolve)?;
        system.transition(LifecycleOp::StartBegin, OpTag::Start)?;
        system.transition(LifecycleOp::StartCommit, OpTag::Start)?;

        let modules = DashMap::new();
        modules.insert(system_id, system);

        Ok(Self {
            level: AtomicU32::new(config.begin_start_level),
            config,
            env,
            platform,
            modules,
            events: EventDispatcher::new(),
            store,
            substrate,
            wiring_lock: BoundedLock::new("wiring"),
            system: system_id,
            next_module: AtomicU64::new(1),
        })
    }

    pub(crate) fn level(&self) -> u32 {
        self.level.load(Ordering::SeqCst)
    }

    pub(crate) fn swap_level(&self, level: u32) -> u32 {
        self.level.swap(level, Ordering::SeqCst)
    }

    pub(crate) fn is_system(&self, id: ModuleId) -> bool {
        id == self.system
    }

    pub(crate) fn require_module(&self, id: ModuleId) -> Result<Arc<Module>> {
        self.modules
            .get(&id)
            .map(|m| m.clone())
            .ok_or(FrameworkError::Core(modulith_core::CoreError::ModuleGone { id }))
    }

    fn install(&self, location: &str, metadata: RevisionMetadata) -> Result<Arc<Module>> {
        let id = ModuleId(self.next_module.fetch_add(1, Ordering::SeqCst));
        let revision = self.env.install(id, metadata);

        let record = self
            .store
            .load(id)
            .unwrap_or_else(|| ModuleRecord::new(location, self.config.initial_module_start_level));
        self.store.save(id, &record);

        let module = Arc::new(Module::new(id, revision, record));
        self.modules.insert(id, module.clone());
        info!("Installed module '{}' as {}", module.name(), id);
        self.events
            .module_event(ModuleEventKind::Installed, id, module.name());
        Ok(module)
    }

    fn resolve_modules(&self, ids: &[ModuleId]) -> Result<bool> {
        let _wiring = self
            .wiring_lock
            .acquire(OpTag::Resolve, self.config.lock_timeout())?;

        let mut targets = Vec::new();
        for id in ids {
            let module = self.require_module(*id)?;
            if module.state() == ModuleState::Installed {
                targets.push(module.current_revision().id());
            }
        }

        let failures = self.resolve_locked(&targets)?;
        Ok(failures.is_empty())
    }

    fn resolve_module(&self, id: ModuleId) -> Result<()> {
        let _wiring = self
            .wiring_lock
            .acquire(OpTag::Resolve, self.config.lock_timeout())?;

        let module = self.require_module(id)?;
        if module.state() != ModuleState::Installed {
            return Ok(());
        }

        let target = module.current_revision().id();
        let mut failures = self.resolve_locked(&[target])?;
        match failures.remove(&target) {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// Run the resolver and commit; the caller holds the wiring lock
    ///
    /// Returns the per-revision failures of the batch. Modules whose
    /// revision resolved transition to RESOLVED under their own lock.
    pub(crate) fn resolve_locked(
        &self,
        targets: &[RevisionId],
    ) -> Result<FxHashMap<RevisionId, ResolveError>> {
        let resolver = Resolver::new(&self.env, self.platform.clone());
        let report = resolver.resolve(targets, ResolveMode::BestEffort);

        let mut resolved: Vec<RevisionId> = report.wirings.keys().copied().collect();
        resolved.sort();
        let failures = report.failures.clone();

        report.commit(&self.env)?;

        for id in resolved {
            let revision = self.env.revision(id)?;
            let Some(module) = self.modules.get(&revision.module()).map(|m| m.clone()) else {
                continue;
            };
            if module.state() != ModuleState::Installed {
                continue;
            }
            // Wiring lock before module lock; reentrant when the caller
            // already holds this module's lock.
            match module.lock.acquire(OpTag::Resolve, self.config.lock_timeout()) {
                Ok(_guard) => {
                    if module.state() == ModuleState::Installed {
                        module.transition(LifecycleOp::Resolve, OpTag::Resolve)?;
                        self.events.module_event(
                            ModuleEventKind::Resolved,
                            module.id(),
                            module.name(),
                        );
                    }
                }
                Err(error) => {
                    self.events
                        .framework_event(FrameworkEvent::error(Some(module.id()), error.to_string()));
                }
            };
        }

        let mut failed: Vec<RevisionId> = failures.keys().copied().collect();
        failed.sort();
        for id in failed {
            let module = self.env.revision(id).ok().map(|r| r.module());
            warn!("Resolution failed for {}: {}", id, failures[&id]);
            self.events
                .framework_event(FrameworkEvent::error(module, failures[&id].to_string()));
        }

        Ok(failures)
    }

    pub(crate) fn start_module(&self, module: &Arc<Module>, options: StartOptions) -> Result<()> {
        let timeout = self.config.lock_timeout();

        // Lock order is wiring before module; resolution is only needed
        // from INSTALLED, so re-check under the module lock and retry with
        // the wiring lock when the state moved underneath us.
        loop {
            let need_resolve = module.state() == ModuleState::Installed;
            let mut ctx = LockContext::new();
            if need_resolve {
                ctx.push(self.wiring_lock.acquire(OpTag::Start, timeout)?);
            }
            ctx.push(module.lock.acquire(OpTag::Start, timeout)?);
            if module.state() == ModuleState::Installed && !need_resolve {
                continue;
            }
            return self.start_locked(module, options);
        }
    }

    /// Start body; the module lock (and the wiring lock when the module is
    /// INSTALLED) is held by the caller
    fn start_locked(&self, module: &Arc<Module>, options: StartOptions) -> Result<()> {
        match module.state() {
            ModuleState::Uninstalled => {
                return Err(FrameworkError::ModuleUninstalled {
                    module: module.id(),
                    name: module.name().to_string(),
                })
            }
            ModuleState::Active => {
                debug!("start of '{}' is a no-op, already active", module.name());
                return Ok(());
            }
            _ => {}
        }
        if module.is_fragment() {
            return Err(FrameworkError::FragmentLifecycle {
                name: module.name().to_string(),
            });
        }

        if !options.transient {
            let record = module.update_record(|r| r.persistently_started = true);
            self.store.save(module.id(), &record);
        }

        let level = module.start_level();
        let framework_level = self.level();
        if level > framework_level {
            if options.transient {
                return Err(FrameworkError::StartLevelTooLow {
                    name: module.name().to_string(),
                    level,
                    framework_level,
                });
            }
            debug!(
                "'{}' waits for start level {} (framework at {})",
                module.name(),
                level,
                framework_level
            );
            return Ok(());
        }

        if module.state() == ModuleState::Installed {
            let target = module.current_revision().id();
            let mut failures = self.resolve_locked(&[target])?;
            if let Some(error) = failures.remove(&target) {
                return Err(error.into());
            }
        }

        module.transition(LifecycleOp::StartBegin, OpTag::Start)?;
        self.events
            .module_event(ModuleEventKind::Starting, module.id(), module.name());

        match self.activate(module) {
            Ok(()) => {
                module.transition(LifecycleOp::StartCommit, OpTag::Start)?;
                self.events
                    .module_event(ModuleEventKind::Started, module.id(), module.name());
                Ok(())
            }
            Err(error) => {
                module.transition(LifecycleOp::StartRevert, OpTag::Start)?;
                self.events
                    .framework_event(FrameworkEvent::error(Some(module.id()), error.to_string()));
                Err(error)
            }
        }
    }

    /// Build the loadable unit if needed and run the activation entry point
    fn activate(&self, module: &Arc<Module>) -> Result<()> {
        let unit = {
            let existing = module.unit.read().clone();
            match existing {
                Some(unit) => unit,
                None => {
                    let revision = module.current_revision();
                    let wiring = self.env.wiring(revision.id()).ok_or_else(|| {
                        FrameworkError::InvalidState {
                            name: module.name().to_string(),
                            state: module.state(),
                            method: OpTag::Start,
                        }
                    })?;
                    let description = WiringEmitter::new(&self.env).emit(&wiring)?;
                    if description.activation.is_some() {
                        let record = module.update_record(|r| r.activation_policy_used = true);
                        self.store.save(module.id(), &record);
                    }
                    let unit = self.substrate.build(&revision, &description).map_err(|e| {
                        FrameworkError::SubstrateFailed {
                            name: module.name().to_string(),
                            source: e,
                        }
                    })?;
                    *module.unit.write() = Some(unit.clone());
                    unit
                }
            }
        };

        let mut slot = module.activator.lock();
        if slot.is_none() {
            *slot = unit.activator();
        }
        if let Some(activator) = slot.as_mut() {
            let context = ActivationContext {
                module: module.id(),
                name: module.name().to_string(),
            };
            // Anything thrown by the entry point, panics included, becomes
            // one reported start failure.
            let outcome = catch_unwind(AssertUnwindSafe(|| activator.start(&context)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(source)) => {
                    return Err(FrameworkError::ActivatorFailed {
                        name: module.name().to_string(),
                        phase: "start",
                        source,
                    })
                }
                Err(_) => {
                    return Err(FrameworkError::ActivatorFailed {
                        name: module.name().to_string(),
                        phase: "start",
                        source: anyhow::anyhow!("activation entry point panicked"),
                    })
                }
            }
        }
        Ok(())
    }

    pub(crate) fn stop_module(&self, module: &Arc<Module>, options: StopOptions) -> Result<()> {
        let _guard = module
            .lock
            .acquire(OpTag::Stop, self.config.lock_timeout())?;

        if module.state() == ModuleState::Uninstalled {
            return Err(FrameworkError::ModuleUninstalled {
                module: module.id(),
                name: module.name().to_string(),
            });
        }
        if module.is_fragment() {
            return Err(FrameworkError::FragmentLifecycle {
                name: module.name().to_string(),
            });
        }

        if !options.transient {
            let record = module.update_record(|r| r.persistently_started = false);
            self.store.save(module.id(), &record);
        }

        if module.state() != ModuleState::Active {
            debug!("stop of '{}' is a no-op, not active", module.name());
            return Ok(());
        }

        module.transition(LifecycleOp::StopBegin, OpTag::Stop)?;
        self.events
            .module_event(ModuleEventKind::Stopping, module.id(), module.name());

        // Deactivation failure is reported but never blocks the transition
        // back to RESOLVED.
        let outcome = self.deactivate(module);

        module.transition(LifecycleOp::StopCommit, OpTag::Stop)?;
        self.events
            .module_event(ModuleEventKind::Stopped, module.id(), module.name());

        if let Err(error) = outcome {
            self.events
                .framework_event(FrameworkEvent::error(Some(module.id()), error.to_string()));
            return Err(error);
        }
        Ok(())
    }

    fn deactivate(&self, module: &Arc<Module>) -> Result<()> {
        let mut slot = module.activator.lock();
        if let Some(activator) = slot.as_mut() {
            let context = ActivationContext {
                module: module.id(),
                name: module.name().to_string(),
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| activator.stop(&context)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(source)) => {
                    return Err(FrameworkError::ActivatorFailed {
                        name: module.name().to_string(),
                        phase: "stop",
                        source,
                    })
                }
                Err(_) => {
                    return Err(FrameworkError::ActivatorFailed {
                        name: module.name().to_string(),
                        phase: "stop",
                        source: anyhow::anyhow!("deactivation entry point panicked"),
                    })
                }
            }
        }
        Ok(())
    }

    pub(crate) fn uninstall_module(&self, module: &Arc<Module>) -> Result<()> {
        if self.is_system(module.id()) {
            return Err(FrameworkError::InvalidState {
                name: module.name().to_string(),
                state: module.state(),
                method: OpTag::Uninstall,
            });
        }

        let _guard = module
            .lock
            .acquire(OpTag::Uninstall, self.config.lock_timeout())?;

        if module.state() == ModuleState::Uninstalled {
            return Err(FrameworkError::ModuleUninstalled {
                module: module.id(),
                name: module.name().to_string(),
            });
        }

        if matches!(module.state(), ModuleState::Active | ModuleState::Starting) {
            if let Err(error) = self.stop_module(module, StopOptions { transient: true }) {
                self.events
                    .framework_event(FrameworkEvent::error(Some(module.id()), error.to_string()));
            }
        }

        for revision in module.revisions() {
            self.env.clear_wiring(revision.id());
            if self.env.is_live(revision.id()) {
                self.env.retire(revision.id())?;
            }
            self.substrate.discard(revision.id());
        }
        *module.unit.write() = None;
        *module.activator.lock() = None;

        module.transition(LifecycleOp::Uninstall, OpTag::Uninstall)?;
        self.store.remove(module.id());
        info!("Uninstalled module '{}'", module.name());
        self.events
            .module_event(ModuleEventKind::Uninstalled, module.id(), module.name());
        Ok(())
    }

    pub(crate) fn update_module(
        &self,
        module: &Arc<Module>,
        metadata: RevisionMetadata,
    ) -> Result<()> {
        if self.is_system(module.id()) {
            return Err(FrameworkError::InvalidState {
                name: module.name().to_string(),
                state: module.state(),
                method: OpTag::Update,
            });
        }

        let _guard = module
            .lock
            .acquire(OpTag::Update, self.config.lock_timeout())?;

        if module.state() == ModuleState::Uninstalled {
            return Err(FrameworkError::ModuleUninstalled {
                module: module.id(),
                name: module.name().to_string(),
            });
        }

        let old = module.current_revision();
        let revision = self.env.install(module.id(), metadata);
        module.push_revision(revision);

        // The old revision leaves candidacy but its wiring stays in use
        // until a refresh; the new revision is not resolved here.
        if self.env.is_live(old.id()) {
            self.env.retire(old.id())?;
        }

        let record = module.update_record(|r| r.revision_counter += 1);
        self.store.save(module.id(), &record);

        info!("Updated module '{}'", module.name());
        self.events
            .module_event(ModuleEventKind::Updated, module.id(), module.name());
        Ok(())
    }
}
