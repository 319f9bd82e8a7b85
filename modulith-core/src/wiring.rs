//! Wires and wiring snapshots
//!
//! A wire pairs one requirement on an importer revision with one capability
//! on an exporter revision. A wiring is the immutable snapshot of all of a
//! revision's accepted wires at a point in time; a new wiring is created on
//! every resolve or refresh, and old snapshots stay valid for code still
//! running against them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capability::{Capability, Requirement};
use crate::revision::RevisionId;

/// An accepted requirement-to-capability pairing between two revisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wire {
    /// The requirement on the importer that this wire satisfies
    pub requirement: Requirement,
    /// The capability on the exporter that satisfies it
    pub capability: Capability,
    /// Revision declaring the requirement
    pub importer: RevisionId,
    /// Revision offering the capability
    pub exporter: RevisionId,
}

impl Wire {
    /// Create a wire; importer and exporter must differ
    pub fn new(
        requirement: Requirement,
        capability: Capability,
        importer: RevisionId,
        exporter: RevisionId,
    ) -> Self {
        debug_assert_ne!(importer, exporter, "a wire must connect two distinct revisions");
        Self {
            requirement,
            capability,
            importer,
            exporter,
        }
    }
}

impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} [{}]", self.importer, self.exporter, self.capability)
    }
}

/// Immutable snapshot of a revision's wires in both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wiring {
    /// Revision this wiring belongs to
    pub revision: RevisionId,
    /// Wires satisfying this revision's requirements
    pub required: Vec<Wire>,
    /// Wires from other revisions satisfied by this revision's capabilities
    pub provided: Vec<Wire>,
    /// Fragments attached to this revision, if it is a host
    pub attached_fragments: Vec<RevisionId>,
}

impl Wiring {
    /// Create an empty wiring for a revision
    pub fn new(revision: RevisionId) -> Self {
        Self {
            revision,
            required: Vec::new(),
            provided: Vec::new(),
            attached_fragments: Vec::new(),
        }
    }

    /// Distinct exporters of the required wires, first-seen order preserved
    pub fn exporters(&self) -> Vec<RevisionId> {
        let mut seen = Vec::new();
        for wire in &self.required {
            if !seen.contains(&wire.exporter) {
                seen.push(wire.exporter);
            }
        }
        seen
    }

    /// Required wires to a specific exporter
    pub fn wires_to(&self, exporter: RevisionId) -> impl Iterator<Item = &Wire> {
        self.required.iter().filter(move |w| w.exporter == exporter)
    }

    /// Whether any required wire targets the given exporter
    pub fn depends_on(&self, exporter: RevisionId) -> bool {
        self.required.iter().any(|w| w.exporter == exporter)
    }
}
