//! Class-loading substrate boundary
//!
//! The substrate turns a dependency description into a loadable unit and
//! hands back the module's activation entry point, if one is declared.
//! Building and executing code is entirely the substrate's concern; the
//! framework only drives it.

use modulith_core::{ModuleId, Revision, RevisionId};
use modulith_resolver::DependencyDescription;
use std::sync::Arc;

/// Context handed to activation entry points
#[derive(Debug, Clone)]
pub struct ActivationContext {
    /// The module being activated or deactivated
    pub module: ModuleId,
    /// Symbolic name of the module
    pub name: String,
}

/// A module's activation entry point
pub trait ModuleActivator: Send {
    /// Called on start, between STARTING and ACTIVE
    fn start(&mut self, context: &ActivationContext) -> anyhow::Result<()>;

    /// Called on stop, between STOPPING and RESOLVED
    fn stop(&mut self, context: &ActivationContext) -> anyhow::Result<()>;
}

/// A built, loadable unit for one revision
pub trait LoadedUnit: Send + Sync {
    /// The declared activation entry point, if any
    fn activator(&self) -> Option<Box<dyn ModuleActivator>>;

    /// Local lookup over the unit's own content, bypassing dependencies
    fn load_local(&self, name: &str) -> Option<Vec<u8>>;
}

/// Builds loadable units from dependency descriptions
pub trait LoadingSubstrate: Send + Sync {
    /// Build the unit for a revision
    fn build(
        &self,
        revision: &Revision,
        description: &DependencyDescription,
    ) -> anyhow::Result<Arc<dyn LoadedUnit>>;

    /// Discard whatever was built for a revision
    fn discard(&self, _revision: RevisionId) {}
}

/// Substrate that builds inert units with no activator
///
/// The default for embedders that drive lifecycle and wiring without
/// executing module code, and for tests.
#[derive(Default)]
pub struct NullSubstrate;

struct NullUnit;

impl LoadedUnit for NullUnit {
    fn activator(&self) -> Option<Box<dyn ModuleActivator>> {
        None
    }

    fn load_local(&self, _name: &str) -> Option<Vec<u8>> {
        None
    }
}

impl LoadingSubstrate for NullSubstrate {
    fn build(
        &self,
        _revision: &Revision,
        _description: &DependencyDescription,
    ) -> anyhow::Result<Arc<dyn LoadedUnit>> {
        Ok(Arc::new(NullUnit))
    }
}
