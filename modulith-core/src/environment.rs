//! The shared dependency environment
//!
//! The environment is the live set of revisions and their current wirings.
//! It is the principal shared mutable resource of the runtime: all writes
//! happen inside the framework-wide wiring lock, and it is passed to the
//! resolver and lifecycle as an explicit collaborator so each can be tested
//! against a fabricated environment with no framework running.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{CoreError, Result};
use crate::revision::{ModuleId, Revision, RevisionId, RevisionMetadata};
use crate::wiring::Wiring;

/// Thread-safe store of revisions, wirings and fragment attachments
#[derive(Clone, Default)]
pub struct Environment {
    inner: Arc<RwLock<EnvironmentInner>>,
}

#[derive(Default)]
struct EnvironmentInner {
    /// Live revisions by id
    revisions: FxHashMap<RevisionId, Arc<Revision>>,
    /// Live revision ids in installation order; candidate enumeration
    /// follows this order so resolution is deterministic
    order: Vec<RevisionId>,
    /// Current wiring per revision; each entry is swapped whole, never
    /// mutated, so readers holding an old snapshot stay consistent
    wirings: FxHashMap<RevisionId, Arc<Wiring>>,
    /// Fragment to host attachment records
    attachments: FxHashMap<RevisionId, RevisionId>,
    /// Revisions removed from candidacy but still referenced by a wiring
    retired: FxHashMap<RevisionId, Arc<Revision>>,
    /// The designated system revision
    system: Option<RevisionId>,
    next_id: u32,
}

impl Environment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new revision for the given module
    pub fn install(&self, module: ModuleId, metadata: RevisionMetadata) -> Arc<Revision> {
        let mut inner = self.inner.write();
        let id = RevisionId(inner.next_id);
        inner.next_id += 1;

        let revision = Arc::new(Revision::new(id, module, metadata));
        inner.revisions.insert(id, revision.clone());
        inner.order.push(id);
        debug!("Installed {} as {}", revision, id);
        revision
    }

    /// Designate the system revision (wired first as an implicit dependency)
    pub fn set_system(&self, id: RevisionId) {
        self.inner.write().system = Some(id);
    }

    /// The designated system revision, if any
    pub fn system(&self) -> Option<RevisionId> {
        self.inner.read().system
    }

    /// Look up a revision, live or retired
    pub fn revision(&self, id: RevisionId) -> Result<Arc<Revision>> {
        let inner = self.inner.read();
        inner
            .revisions
            .get(&id)
            .or_else(|| inner.retired.get(&id))
            .cloned()
            .ok_or(CoreError::MissingRevision { id })
    }

    /// Whether the revision is live (a resolution candidate)
    pub fn is_live(&self, id: RevisionId) -> bool {
        self.inner.read().revisions.contains_key(&id)
    }

    /// Live revisions in installation order
    pub fn revisions(&self) -> Vec<Arc<Revision>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.revisions.get(id).cloned())
            .collect()
    }

    /// Current wiring of a revision, if resolved
    pub fn wiring(&self, id: RevisionId) -> Option<Arc<Wiring>> {
        self.inner.read().wirings.get(&id).cloned()
    }

    /// Whether a revision currently has a wiring
    pub fn is_resolved(&self, id: RevisionId) -> bool {
        self.inner.read().wirings.contains_key(&id)
    }

    /// Snapshot of all current wirings
    pub fn wirings(&self) -> Vec<Arc<Wiring>> {
        self.inner.read().wirings.values().cloned().collect()
    }

    /// Atomically replace a revision's current wiring
    ///
    /// Every wire endpoint must name an existing revision and no wire may
    /// connect a revision to itself; violations are defects in the caller
    /// and abort the operation.
    pub fn set_wiring(&self, wiring: Wiring) -> Result<Arc<Wiring>> {
        let mut inner = self.inner.write();
        for wire in wiring.required.iter().chain(wiring.provided.iter()) {
            if wire.importer == wire.exporter {
                return Err(CoreError::SelfWire { id: wire.importer });
            }
            for endpoint in [wire.importer, wire.exporter] {
                if !inner.revisions.contains_key(&endpoint) && !inner.retired.contains_key(&endpoint)
                {
                    return Err(CoreError::MissingWireEndpoint {
                        id: endpoint,
                        importer: wire.importer,
                        exporter: wire.exporter,
                    });
                }
            }
        }

        let id = wiring.revision;
        let wiring = Arc::new(wiring);
        inner.wirings.insert(id, wiring.clone());
        trace!("Swapped wiring for {}", id);
        Ok(wiring)
    }

    /// Drop a revision's current wiring, returning the old snapshot
    pub fn clear_wiring(&self, id: RevisionId) -> Option<Arc<Wiring>> {
        self.inner.write().wirings.remove(&id)
    }

    /// Record a fragment-to-host attachment
    pub fn attach_fragment(&self, fragment: RevisionId, host: RevisionId) {
        debug!("Attached fragment {} to host {}", fragment, host);
        self.inner.write().attachments.insert(fragment, host);
    }

    /// Host a fragment is attached to, if any
    pub fn host_of(&self, fragment: RevisionId) -> Option<RevisionId> {
        self.inner.read().attachments.get(&fragment).copied()
    }

    /// Fragments attached to the given host
    pub fn attached_fragments(&self, host: RevisionId) -> Vec<RevisionId> {
        let inner = self.inner.read();
        let mut fragments: Vec<_> = inner
            .attachments
            .iter()
            .filter(|(_, h)| **h == host)
            .map(|(f, _)| *f)
            .collect();
        fragments.sort();
        fragments
    }

    /// Drop the attachment record of a fragment
    pub fn detach_fragment(&self, fragment: RevisionId) {
        self.inner.write().attachments.remove(&fragment);
    }

    /// Remove a revision from candidacy, keeping it while wirings refer to it
    ///
    /// The revision stops being offered to new resolves immediately; the
    /// object stays reachable by id until [`purge_unreferenced`] collects it.
    ///
    /// [`purge_unreferenced`]: Environment::purge_unreferenced
    pub fn retire(&self, id: RevisionId) -> Result<()> {
        let mut inner = self.inner.write();
        let revision = inner
            .revisions
            .remove(&id)
            .ok_or(CoreError::MissingRevision { id })?;
        inner.order.retain(|r| *r != id);
        inner.attachments.retain(|frag, host| *frag != id && *host != id);
        inner.retired.insert(id, revision);
        debug!("Retired {}", id);
        Ok(())
    }

    /// Whether any current wiring still references the revision
    pub fn in_use(&self, id: RevisionId) -> bool {
        let inner = self.inner.read();
        inner.wirings.values().any(|wiring| {
            wiring.revision == id
                || wiring
                    .required
                    .iter()
                    .chain(wiring.provided.iter())
                    .any(|w| w.importer == id || w.exporter == id)
        })
    }

    /// Drop retired revisions no current wiring refers to
    ///
    /// Returns the ids that were collected.
    pub fn purge_unreferenced(&self) -> Vec<RevisionId> {
        let mut inner = self.inner.write();
        let referenced: Vec<RevisionId> = inner
            .retired
            .keys()
            .filter(|id| {
                inner.wirings.values().any(|wiring| {
                    wiring.revision == **id
                        || wiring
                            .required
                            .iter()
                            .chain(wiring.provided.iter())
                            .any(|w| w.importer == **id || w.exporter == **id)
                })
            })
            .copied()
            .collect();

        let purged: Vec<RevisionId> = inner
            .retired
            .keys()
            .filter(|id| !referenced.contains(id))
            .copied()
            .collect();
        for id in &purged {
            inner.retired.remove(id);
            debug!("Purged retired revision {}", id);
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Requirement;
    use crate::wiring::Wire;
    use crate::Capability;
    use semver::Version;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn install(env: &Environment, module: u64, name: &str) -> Arc<Revision> {
        let metadata = RevisionMetadata::builder(name, v("1.0.0")).build().unwrap();
        env.install(ModuleId(module), metadata)
    }

    fn package_wire(importer: RevisionId, exporter: RevisionId) -> Wire {
        Wire::new(
            Requirement::package("p"),
            Capability::package("p", v("1.0.0")),
            importer,
            exporter,
        )
    }

    #[test]
    fn test_install_assigns_sequential_ids() {
        let env = Environment::new();
        let a = install(&env, 1, "a");
        let b = install(&env, 2, "b");
        assert_eq!(a.id(), RevisionId(0));
        assert_eq!(b.id(), RevisionId(1));
        assert_eq!(env.revisions().len(), 2);
    }

    #[test]
    fn test_set_wiring_rejects_self_wire() {
        let env = Environment::new();
        let a = install(&env, 1, "a");
        let mut wiring = Wiring::new(a.id());
        wiring.required.push(Wire {
            requirement: Requirement::package("p"),
            capability: Capability::package("p", v("1.0.0")),
            importer: a.id(),
            exporter: a.id(),
        });
        assert!(matches!(env.set_wiring(wiring), Err(CoreError::SelfWire { .. })));
    }

    #[test]
    fn test_set_wiring_rejects_missing_endpoint() {
        let env = Environment::new();
        let a = install(&env, 1, "a");
        let mut wiring = Wiring::new(a.id());
        wiring.required.push(package_wire(a.id(), RevisionId(99)));
        assert!(matches!(
            env.set_wiring(wiring),
            Err(CoreError::MissingWireEndpoint { .. })
        ));
    }

    #[test]
    fn test_retired_revision_leaves_candidacy_but_stays_reachable() {
        let env = Environment::new();
        let a = install(&env, 1, "a");
        env.retire(a.id()).unwrap();

        assert!(!env.is_live(a.id()));
        assert!(env.revisions().is_empty());
        assert!(env.revision(a.id()).is_ok());
    }

    #[test]
    fn test_purge_keeps_in_use_revisions() {
        let env = Environment::new();
        let a = install(&env, 1, "a");
        let b = install(&env, 2, "b");

        let mut wiring = Wiring::new(b.id());
        wiring.required.push(package_wire(b.id(), a.id()));
        env.set_wiring(wiring).unwrap();

        env.retire(a.id()).unwrap();
        assert!(env.in_use(a.id()));
        assert!(env.purge_unreferenced().is_empty());

        env.clear_wiring(b.id());
        assert_eq!(env.purge_unreferenced(), vec![a.id()]);
        assert!(env.revision(a.id()).is_err());
    }

    #[test]
    fn test_fragment_attachment_records() {
        let env = Environment::new();
        let host = install(&env, 1, "host");
        let frag = install(&env, 2, "frag");

        env.attach_fragment(frag.id(), host.id());
        assert_eq!(env.host_of(frag.id()), Some(host.id()));
        assert_eq!(env.attached_fragments(host.id()), vec![frag.id()]);

        env.detach_fragment(frag.id());
        assert_eq!(env.host_of(frag.id()), None);
    }
}
