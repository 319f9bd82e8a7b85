//! Constraint solving over capabilities and requirements
//!
//! The resolver takes a set of unresolved revisions, with the already
//! resolved revisions as fixed background, and computes a wiring per
//! satisfiable revision. Candidate enumeration follows environment
//! installation order and tie-breaks are explicit, so resolving the same
//! input twice yields identical wirings.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{debug, trace};

use modulith_core::{
    Capability, CoreError, Environment, Requirement, Revision, RevisionId, Wire, Wiring,
    HOST_NAMESPACE, PACKAGE_NAMESPACE,
};

use crate::error::{ResolveError, UnsatisfiedSet};
use crate::native::{select_clause, Platform};

/// How a batch reacts to per-revision failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Keep the wirings of satisfiable revisions, report the rest
    BestEffort,
    /// Any failure discards the whole batch
    AllOrNone,
}

/// The outcome of one resolve batch
///
/// Nothing is written to the environment until [`commit`] is called, so a
/// report can be inspected (or discarded) without side effects.
///
/// [`commit`]: ResolveReport::commit
#[derive(Debug, Default)]
pub struct ResolveReport {
    /// New wirings per satisfied revision
    pub wirings: FxHashMap<RevisionId, Wiring>,
    /// Fragment attachments decided this round
    pub attachments: Vec<(RevisionId, RevisionId)>,
    /// Per-revision failure reasons
    pub failures: FxHashMap<RevisionId, ResolveError>,
    /// Provided wires to merge into already-resolved exporters
    background_provided: FxHashMap<RevisionId, Vec<Wire>>,
}

impl ResolveReport {
    /// Whether every attempted revision was satisfied
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// The new wiring computed for a revision, if it was satisfied
    pub fn wiring_of(&self, id: RevisionId) -> Option<&Wiring> {
        self.wirings.get(&id)
    }

    /// Write the report into the environment
    ///
    /// Must be called under the framework-wide wiring lock. Wirings are
    /// applied in revision-id order; background exporters that gained
    /// dependents get a fresh wiring snapshot with the new provided wires
    /// appended.
    pub fn commit(self, env: &Environment) -> Result<Vec<Arc<Wiring>>, CoreError> {
        for (fragment, host) in &self.attachments {
            env.attach_fragment(*fragment, *host);
        }

        let mut ids: Vec<RevisionId> = self.wirings.keys().copied().collect();
        ids.sort();

        let mut committed = Vec::with_capacity(ids.len());
        let mut wirings = self.wirings;
        for id in ids {
            let wiring = wirings.remove(&id).expect("id came from the map");
            committed.push(env.set_wiring(wiring)?);
        }

        let mut exporters: Vec<RevisionId> = self.background_provided.keys().copied().collect();
        exporters.sort();
        for exporter in exporters {
            if let Some(current) = env.wiring(exporter) {
                let mut updated = (*current).clone();
                updated
                    .provided
                    .extend(self.background_provided[&exporter].iter().cloned());
                env.set_wiring(updated)?;
            }
        }

        Ok(committed)
    }
}

/// Constraint solver over a dependency environment
pub struct Resolver<'e> {
    env: &'e Environment,
    platform: Platform,
}

impl<'e> Resolver<'e> {
    /// Create a resolver over the given environment
    pub fn new(env: &'e Environment, platform: Platform) -> Self {
        Self { env, platform }
    }

    /// Resolve a batch of revisions
    pub fn resolve(&self, targets: &[RevisionId], mode: ResolveMode) -> ResolveReport {
        let mut session = Session::new(self.env, self.platform.clone());
        session.run(targets);
        session.into_report(mode)
    }

    /// Resolve a single revision, strict
    ///
    /// Returns the structured failure for the revision when it cannot be
    /// satisfied, suitable for surfacing to a user.
    pub fn resolve_one(&self, target: RevisionId) -> Result<ResolveReport, ResolveError> {
        let report = self.resolve(&[target], ResolveMode::AllOrNone);
        if let Some(error) = report.failures.get(&target) {
            return Err(error.clone());
        }
        if !report.failures.is_empty() {
            // A co-resolved dependency failed; surface the first failure
            // deterministically.
            let mut ids: Vec<_> = report.failures.keys().copied().collect();
            ids.sort();
            return Err(report.failures[&ids[0]].clone());
        }
        Ok(report)
    }
}

/// One candidate provider for a requirement
struct Candidate {
    exporter: RevisionId,
    capability: Capability,
    order: usize,
}

struct Session {
    platform: Platform,
    /// Live revisions in installation order
    revisions: Vec<Arc<Revision>>,
    by_id: FxHashMap<RevisionId, Arc<Revision>>,
    /// Enumeration position per revision, for the final tie-break
    position: FxHashMap<RevisionId, usize>,
    /// Already-resolved background
    background: FxHashSet<RevisionId>,
    system: Option<RevisionId>,
    /// Fragment attachments: pre-existing plus tentative this round
    attachments: FxHashMap<RevisionId, RevisionId>,
    new_attachments: Vec<(RevisionId, RevisionId)>,
    /// Accepted required wires per revision satisfied this round
    pending: FxHashMap<RevisionId, Vec<Wire>>,
    in_progress: FxHashSet<RevisionId>,
    failures: FxHashMap<RevisionId, ResolveError>,
    /// Providers already used by a wire in this batch, preferred on ties
    wired_providers: FxHashSet<RevisionId>,
}

impl Session {
    fn new(env: &Environment, platform: Platform) -> Self {
        let revisions = env.revisions();
        let mut by_id = FxHashMap::default();
        let mut position = FxHashMap::default();
        let mut background = FxHashSet::default();
        let mut attachments = FxHashMap::default();

        for (index, revision) in revisions.iter().enumerate() {
            by_id.insert(revision.id(), revision.clone());
            position.insert(revision.id(), index);
            if env.is_resolved(revision.id()) {
                background.insert(revision.id());
            }
            if let Some(host) = env.host_of(revision.id()) {
                attachments.insert(revision.id(), host);
            }
        }

        Self {
            platform,
            revisions,
            by_id,
            position,
            background,
            system: env.system(),
            attachments,
            new_attachments: Vec::new(),
            pending: FxHashMap::default(),
            in_progress: FxHashSet::default(),
            failures: FxHashMap::default(),
            wired_providers: FxHashSet::default(),
        }
    }

    fn run(&mut self, targets: &[RevisionId]) {
        // Fragment host selection happens before any host is processed so
        // host resolution sees the merged requirement and capability sets.
        self.select_fragment_hosts(targets);

        // Targets naming no live revision are consistency violations.
        for id in targets {
            if !self.by_id.contains_key(id) {
                self.failures
                    .insert(*id, ResolveError::Core(CoreError::MissingRevision { id: *id }));
            }
        }

        // Process targets in installation order for determinism.
        let mut ordered: Vec<RevisionId> = targets
            .iter()
            .copied()
            .filter(|id| self.by_id.contains_key(id))
            .collect();
        ordered.sort_by_key(|id| self.position[id]);
        ordered.dedup();

        for id in ordered {
            let _ = self.resolve_revision(id);
        }

        self.propagate_failures();
    }

    /// Pick a host for every unresolved, unattached fragment in the batch
    fn select_fragment_hosts(&mut self, targets: &[RevisionId]) {
        let fragments: Vec<Arc<Revision>> = self
            .revisions
            .iter()
            .filter(|r| {
                r.is_fragment()
                    && !self.background.contains(&r.id())
                    && !self.attachments.contains_key(&r.id())
            })
            .cloned()
            .collect();

        for fragment in fragments {
            let host_req = fragment
                .metadata()
                .fragment_host
                .clone()
                .expect("fragment revisions carry a host requirement");

            let mut candidates: Vec<Candidate> = Vec::new();
            for provider in &self.revisions {
                if provider.is_fragment()
                    || provider.id() == fragment.id()
                    || self.background.contains(&provider.id())
                {
                    // A fragment cannot attach to an already-resolved host
                    // until a refresh recomputes that host's wiring.
                    continue;
                }
                for capability in provider.capabilities(HOST_NAMESPACE) {
                    if host_req.matches(capability) {
                        candidates.push(Candidate {
                            exporter: provider.id(),
                            capability: capability.clone(),
                            order: self.position[&provider.id()],
                        });
                    }
                }
            }
            self.sort_candidates(&mut candidates);

            match candidates.first() {
                Some(host) => {
                    trace!("Fragment {} attaches to {}", fragment, host.exporter);
                    self.attachments.insert(fragment.id(), host.exporter);
                    self.new_attachments.push((fragment.id(), host.exporter));
                }
                None if targets.contains(&fragment.id()) => {
                    self.failures.insert(
                        fragment.id(),
                        ResolveError::Unsatisfied {
                            revision: fragment.id(),
                            name: fragment.symbolic_name().to_string(),
                            missing: UnsatisfiedSet(vec![host_req]),
                        },
                    );
                }
                None => {}
            }
        }
    }

    fn resolve_revision(&mut self, id: RevisionId) -> Result<(), ResolveError> {
        if self.background.contains(&id) || self.pending.contains_key(&id) {
            return Ok(());
        }
        if let Some(error) = self.failures.get(&id) {
            return Err(error.clone());
        }
        if self.in_progress.contains(&id) {
            // Dependency cycle: accept tentatively; propagate_failures
            // rolls the cycle back if any member ultimately fails.
            return Ok(());
        }

        let revision = self.by_id[&id].clone();
        if revision.is_fragment() {
            return match self.attachments.get(&id).copied() {
                Some(host) => self.resolve_revision(host),
                None => {
                    let error = self.failures.get(&id).cloned().unwrap_or_else(|| {
                        ResolveError::Unsatisfied {
                            revision: id,
                            name: revision.symbolic_name().to_string(),
                            missing: UnsatisfiedSet(vec![revision
                                .metadata()
                                .fragment_host
                                .clone()
                                .expect("fragment revisions carry a host requirement")]),
                        }
                    });
                    self.failures.insert(id, error.clone());
                    Err(error)
                }
            };
        }

        self.in_progress.insert(id);
        let outcome = self.wire_revision(&revision);
        self.in_progress.remove(&id);

        match outcome {
            Ok(wires) => {
                debug!("Resolved {} with {} wires", revision, wires.len());
                self.pending.insert(id, wires);
                // Fragments attached to this host resolve with it.
                let fragments = self.fragments_of(id);
                for fragment in fragments {
                    self.pending.entry(fragment).or_default();
                }
                Ok(())
            }
            Err(error) => {
                debug!("Failed to resolve {}: {}", revision, error);
                self.failures.insert(id, error.clone());
                Err(error)
            }
        }
    }

    /// Compute the accepted required wires of a non-fragment revision
    fn wire_revision(&mut self, revision: &Arc<Revision>) -> Result<Vec<Wire>, ResolveError> {
        let id = revision.id();
        let mut wires = Vec::new();

        // The system revision is an implicit background dependency, wired
        // before any explicit requirement is processed.
        if let Some(system) = self.system {
            if system != id {
                if let Some(system_rev) = self.by_id.get(&system) {
                    let capability = system_rev.module_capability().cloned().unwrap_or_else(|| {
                        Capability::module(system_rev.symbolic_name(), system_rev.version().clone())
                    });
                    let requirement = Requirement::module(system_rev.symbolic_name());
                    wires.push(Wire::new(requirement, capability, id, system));
                }
            }
        }

        // Effective requirements: the revision's own plus those of attached
        // fragments, resolved as if declared by the host. Package-style
        // imports are processed before everything else so an import always
        // takes precedence over a require that would expose the same name.
        let mut requirements: Vec<Requirement> = revision.metadata().requirements.clone();
        for fragment in self.fragments_of(id) {
            let fragment_rev = &self.by_id[&fragment];
            requirements.extend(fragment_rev.metadata().requirements.iter().cloned());
        }
        requirements.sort_by_key(|req| usize::from(req.namespace != PACKAGE_NAMESPACE));

        let mut missing = Vec::new();
        for requirement in requirements {
            if requirement.namespace == HOST_NAMESPACE {
                continue;
            }

            let mut candidates = self.enumerate(id, &requirement);
            self.sort_candidates(&mut candidates);

            let mut accepted = None;
            for candidate in candidates {
                if self.usable(candidate.exporter) {
                    accepted = Some(candidate);
                    break;
                }
            }

            match accepted {
                Some(candidate) => {
                    trace!("{}: {} satisfied by {}", revision, requirement, candidate.exporter);
                    self.wired_providers.insert(candidate.exporter);
                    wires.push(Wire::new(
                        requirement,
                        candidate.capability,
                        id,
                        candidate.exporter,
                    ));
                }
                None if requirement.is_mandatory() => missing.push(requirement),
                None => {
                    debug!("{}: dropping optional requirement {}", revision, requirement);
                }
            }
        }

        if !missing.is_empty() {
            return Err(ResolveError::Unsatisfied {
                revision: id,
                name: revision.symbolic_name().to_string(),
                missing: UnsatisfiedSet(missing),
            });
        }

        self.check_native(revision)?;
        Ok(wires)
    }

    /// Whether an exporter can back a wire this round
    fn usable(&mut self, exporter: RevisionId) -> bool {
        if self.background.contains(&exporter)
            || self.pending.contains_key(&exporter)
            || self.in_progress.contains(&exporter)
        {
            return true;
        }
        self.resolve_revision(exporter).is_ok()
    }

    /// Enumerate matching providers in installation order
    fn enumerate(&self, requirer: RevisionId, requirement: &Requirement) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (index, provider) in self.revisions.iter().enumerate() {
            // No self-wires; fragments are never providers themselves, their
            // capabilities are reachable through the host.
            if provider.id() == requirer || provider.is_fragment() {
                continue;
            }
            for capability in self.effective_capabilities(provider, &requirement.namespace) {
                if requirement.matches(&capability) {
                    out.push(Candidate {
                        exporter: provider.id(),
                        capability,
                        order: index,
                    });
                }
            }
        }
        out
    }

    /// A host's capabilities plus those contributed by attached fragments
    fn effective_capabilities(&self, provider: &Arc<Revision>, namespace: &str) -> Vec<Capability> {
        let mut out: Vec<Capability> = provider.capabilities(namespace).cloned().collect();
        for fragment in self.fragments_of(provider.id()) {
            if let Some(fragment_rev) = self.by_id.get(&fragment) {
                out.extend(fragment_rev.capabilities(namespace).cloned());
            }
        }
        out
    }

    fn fragments_of(&self, host: RevisionId) -> Vec<RevisionId> {
        let mut fragments: Vec<RevisionId> = self
            .attachments
            .iter()
            .filter(|(_, h)| **h == host)
            .map(|(f, _)| *f)
            .collect();
        fragments.sort_by_key(|id| self.position.get(id).copied().unwrap_or(usize::MAX));
        fragments
    }

    /// Tie-break order: already-wired-to providers, then highest version,
    /// then stable enumeration order
    fn sort_candidates(&self, candidates: &mut [Candidate]) {
        candidates.sort_by(|a, b| {
            let a_wired = self.wired_providers.contains(&a.exporter);
            let b_wired = self.wired_providers.contains(&b.exporter);
            b_wired
                .cmp(&a_wired)
                .then_with(|| b.capability.version.cmp(&a.capability.version))
                .then_with(|| a.order.cmp(&b.order))
        });
    }

    fn check_native(&self, revision: &Arc<Revision>) -> Result<(), ResolveError> {
        let Some(native) = &revision.metadata().native else {
            return Ok(());
        };
        match select_clause(native, &self.platform) {
            Some(clause) => {
                for library in &clause.libraries {
                    if !revision.metadata().content.iter().any(|entry| entry == library) {
                        return Err(ResolveError::MissingNativeLibrary {
                            revision: revision.id(),
                            name: revision.symbolic_name().to_string(),
                            library: library.clone(),
                        });
                    }
                }
                Ok(())
            }
            None if native.optional || native.clauses.is_empty() => Ok(()),
            None => Err(ResolveError::NoNativeMatch {
                revision: revision.id(),
                name: revision.symbolic_name().to_string(),
            }),
        }
    }

    /// Roll back revisions wired to a batch member that ultimately failed
    fn propagate_failures(&mut self) {
        loop {
            let mut ids: Vec<RevisionId> = self.pending.keys().copied().collect();
            ids.sort_by_key(|id| self.position.get(id).copied().unwrap_or(usize::MAX));

            let mut dropped = None;
            'outer: for id in &ids {
                let wires = &self.pending[id];
                for wire in wires {
                    if self.failures.contains_key(&wire.exporter) {
                        dropped = Some((*id, wire.requirement.clone()));
                        break 'outer;
                    }
                }
                // A fragment resolves only while its host does.
                if let Some(host) = self.attachments.get(id) {
                    if self.failures.contains_key(host) {
                        let revision = &self.by_id[id];
                        dropped = Some((
                            *id,
                            revision
                                .metadata()
                                .fragment_host
                                .clone()
                                .expect("fragment revisions carry a host requirement"),
                        ));
                        break 'outer;
                    }
                }
            }

            let Some((id, requirement)) = dropped else {
                break;
            };
            let name = self.by_id[&id].symbolic_name().to_string();
            debug!("Rolling back {} wired to a failed dependency", name);
            self.pending.remove(&id);
            self.failures.insert(
                id,
                ResolveError::Unsatisfied {
                    revision: id,
                    name,
                    missing: UnsatisfiedSet(vec![requirement]),
                },
            );
        }
    }

    fn into_report(mut self, mode: ResolveMode) -> ResolveReport {
        let mut report = ResolveReport::default();

        if mode == ResolveMode::AllOrNone && !self.failures.is_empty() {
            report.failures = self.failures;
            return report;
        }

        // Build the final wirings: required wires from the session, host
        // wires for attached fragments, provided wires collected from every
        // importer of a batch member.
        let mut provided: FxHashMap<RevisionId, Vec<Wire>> = FxHashMap::default();
        let mut ids: Vec<RevisionId> = self.pending.keys().copied().collect();
        ids.sort_by_key(|id| self.position.get(id).copied().unwrap_or(usize::MAX));

        for id in &ids {
            for wire in &self.pending[id] {
                provided.entry(wire.exporter).or_default().push(wire.clone());
            }
        }

        for id in ids {
            let revision = &self.by_id[&id];
            let wires = self.pending[&id].clone();

            if revision.is_fragment() {
                let host = self.attachments[&id];
                let host_rev = &self.by_id[&host];
                let host_capability = host_rev
                    .capabilities(HOST_NAMESPACE)
                    .next()
                    .cloned()
                    .unwrap_or_else(|| {
                        Capability::host(host_rev.symbolic_name(), host_rev.version().clone())
                    });
                let host_wire = Wire::new(
                    revision
                        .metadata()
                        .fragment_host
                        .clone()
                        .expect("fragment revisions carry a host requirement"),
                    host_capability,
                    id,
                    host,
                );
                provided.entry(host).or_default().push(host_wire.clone());
                report.wirings.insert(
                    id,
                    Wiring {
                        revision: id,
                        required: vec![host_wire],
                        provided: Vec::new(),
                        attached_fragments: Vec::new(),
                    },
                );
            } else {
                report.wirings.insert(
                    id,
                    Wiring {
                        revision: id,
                        required: wires,
                        provided: Vec::new(),
                        attached_fragments: self.fragments_of(id),
                    },
                );
            }
        }

        // Distribute provided wires to batch members; wires whose exporter
        // is background-resolved are merged into that wiring at commit.
        for (exporter, wires) in provided {
            if let Some(wiring) = report.wirings.get_mut(&exporter) {
                wiring.provided.extend(wires);
            } else if self.background.contains(&exporter) {
                report
                    .background_provided
                    .entry(exporter)
                    .or_default()
                    .extend(wires);
            }
        }

        report.attachments = std::mem::take(&mut self.new_attachments)
            .into_iter()
            .filter(|(fragment, _)| report.wirings.contains_key(fragment))
            .collect();
        report.failures = self.failures;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modulith_core::{ModuleId, RevisionMetadata};
    use semver::Version;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn resolver(env: &Environment) -> Resolver<'_> {
        Resolver::new(env, Platform::current())
    }

    #[test]
    fn test_simple_resolve_wires_importer_to_exporter() {
        let env = Environment::new();
        let x = env.install(
            ModuleId(1),
            RevisionMetadata::builder("x", v("1.0.0"))
                .export_package("p", v("1.0.0"))
                .build()
                .unwrap(),
        );
        let y = env.install(
            ModuleId(2),
            RevisionMetadata::builder("y", v("1.0.0"))
                .import_package(Requirement::package("p"))
                .build()
                .unwrap(),
        );

        let report = resolver(&env).resolve(&[x.id(), y.id()], ResolveMode::BestEffort);
        assert!(report.is_success());

        let wiring = report.wiring_of(y.id()).unwrap();
        let package_wires: Vec<_> = wiring
            .required
            .iter()
            .filter(|w| w.requirement.namespace == PACKAGE_NAMESPACE)
            .collect();
        assert_eq!(package_wires.len(), 1);
        assert_eq!(package_wires[0].exporter, x.id());
    }

    #[test]
    fn test_unresolvable_mandatory_import_lists_requirement() {
        let env = Environment::new();
        let z = env.install(
            ModuleId(1),
            RevisionMetadata::builder("z", v("1.0.0"))
                .import_package(Requirement::package("q"))
                .build()
                .unwrap(),
        );

        let report = resolver(&env).resolve(&[z.id()], ResolveMode::BestEffort);
        assert!(!report.is_success());
        match &report.failures[&z.id()] {
            ResolveError::Unsatisfied { missing, .. } => {
                assert_eq!(missing.0.len(), 1);
                assert_eq!(missing.0[0].name, "q");
            }
            other => panic!("unexpected failure: {other}"),
        }
    }

    #[test]
    fn test_optional_import_dropped_without_failure() {
        let env = Environment::new();
        let w = env.install(
            ModuleId(1),
            RevisionMetadata::builder("w", v("1.0.0"))
                .import_package(Requirement::package("s").optional())
                .build()
                .unwrap(),
        );

        let report = resolver(&env).resolve(&[w.id()], ResolveMode::BestEffort);
        assert!(report.is_success());
        let wiring = report.wiring_of(w.id()).unwrap();
        assert!(wiring
            .required
            .iter()
            .all(|wire| wire.requirement.namespace != PACKAGE_NAMESPACE));
    }

    #[test]
    fn test_no_self_wires() {
        let env = Environment::new();
        // Exports and imports the same package; must not wire to itself.
        let a = env.install(
            ModuleId(1),
            RevisionMetadata::builder("a", v("1.0.0"))
                .export_package("p", v("1.0.0"))
                .import_package(Requirement::package("p").optional())
                .build()
                .unwrap(),
        );

        let report = resolver(&env).resolve(&[a.id()], ResolveMode::BestEffort);
        assert!(report.is_success());
        let wiring = report.wiring_of(a.id()).unwrap();
        assert!(wiring.required.iter().all(|w| w.exporter != a.id()));
    }

    #[test]
    fn test_highest_version_wins() {
        let env = Environment::new();
        let old = env.install(
            ModuleId(1),
            RevisionMetadata::builder("p-old", v("1.0.0"))
                .export_package("p", v("1.0.0"))
                .build()
                .unwrap(),
        );
        let new = env.install(
            ModuleId(2),
            RevisionMetadata::builder("p-new", v("1.0.0"))
                .export_package("p", v("2.0.0"))
                .build()
                .unwrap(),
        );
        let user = env.install(
            ModuleId(3),
            RevisionMetadata::builder("user", v("1.0.0"))
                .import_package(Requirement::package("p"))
                .build()
                .unwrap(),
        );

        let report =
            resolver(&env).resolve(&[old.id(), new.id(), user.id()], ResolveMode::BestEffort);
        assert!(report.is_success());
        let wiring = report.wiring_of(user.id()).unwrap();
        let wire = wiring
            .required
            .iter()
            .find(|w| w.requirement.namespace == PACKAGE_NAMESPACE)
            .unwrap();
        assert_eq!(wire.exporter, new.id());
    }

    #[test]
    fn test_already_wired_provider_preferred_over_version() {
        let env = Environment::new();
        // first importer wires to the only provider of "a"; the second
        // requirement can be satisfied by either provider, and the one
        // already in use wins despite its lower version.
        let shared = env.install(
            ModuleId(1),
            RevisionMetadata::builder("shared", v("1.0.0"))
                .export_package("a", v("1.0.0"))
                .export_package("b", v("1.0.0"))
                .build()
                .unwrap(),
        );
        let other = env.install(
            ModuleId(2),
            RevisionMetadata::builder("other", v("1.0.0"))
                .export_package("b", v("9.0.0"))
                .build()
                .unwrap(),
        );
        let user = env.install(
            ModuleId(3),
            RevisionMetadata::builder("user", v("1.0.0"))
                .import_package(Requirement::package("a"))
                .import_package(Requirement::package("b"))
                .build()
                .unwrap(),
        );

        let report =
            resolver(&env).resolve(&[shared.id(), other.id(), user.id()], ResolveMode::BestEffort);
        assert!(report.is_success());
        let wiring = report.wiring_of(user.id()).unwrap();
        let b_wire = wiring
            .required
            .iter()
            .find(|w| w.requirement.name == "b")
            .unwrap();
        assert_eq!(b_wire.exporter, shared.id());
        let _ = other;
    }

    #[test]
    fn test_all_or_none_discards_batch() {
        let env = Environment::new();
        let good = env.install(
            ModuleId(1),
            RevisionMetadata::builder("good", v("1.0.0")).build().unwrap(),
        );
        let bad = env.install(
            ModuleId(2),
            RevisionMetadata::builder("bad", v("1.0.0"))
                .import_package(Requirement::package("nowhere"))
                .build()
                .unwrap(),
        );

        let report = resolver(&env).resolve(&[good.id(), bad.id()], ResolveMode::AllOrNone);
        assert!(!report.is_success());
        assert!(report.wirings.is_empty());
    }

    #[test]
    fn test_failure_propagates_to_dependents_in_batch() {
        let env = Environment::new();
        // provider fails its native check; importer must fail too.
        let provider = env.install(
            ModuleId(1),
            RevisionMetadata::builder("provider", v("1.0.0"))
                .export_package("p", v("1.0.0"))
                .native(modulith_core::NativeCode {
                    clauses: vec![modulith_core::NativeClause {
                        libraries: vec!["libmissing.so".to_string()],
                        os_names: vec![],
                        processors: vec![],
                        languages: vec![],
                        os_version_floor: None,
                    }],
                    optional: false,
                })
                .build()
                .unwrap(),
        );
        let user = env.install(
            ModuleId(2),
            RevisionMetadata::builder("user", v("1.0.0"))
                .import_package(Requirement::package("p"))
                .build()
                .unwrap(),
        );

        let report = resolver(&env).resolve(&[provider.id(), user.id()], ResolveMode::BestEffort);
        assert!(report.failures.contains_key(&provider.id()));
        assert!(report.failures.contains_key(&user.id()));
        assert!(report.wirings.is_empty());
    }

    #[test]
    fn test_resolve_one_strict_returns_structured_error() {
        let env = Environment::new();
        let z = env.install(
            ModuleId(1),
            RevisionMetadata::builder("z", v("1.0.0"))
                .import_package(Requirement::package("q"))
                .build()
                .unwrap(),
        );

        let error = resolver(&env).resolve_one(z.id()).unwrap_err();
        assert!(error.to_string().contains("q"));
    }
}
