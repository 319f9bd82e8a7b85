//! Dependency model error types

use thiserror::Error;

use crate::revision::{ModuleId, RevisionId};

/// Type alias for dependency model results
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in the dependency model
///
/// These are consistency violations: the caller named a revision or module
/// that does not (or no longer) exists. They indicate a defect in the
/// calling code, not a recoverable condition, and abort the operation.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// A revision id did not resolve to a live revision
    #[error("Revision {id} does not exist in the environment")]
    MissingRevision {
        /// The stale revision id
        id: RevisionId,
    },

    /// A wire names an endpoint that does not exist
    #[error("Wire endpoint {id} does not exist (importer {importer}, exporter {exporter})")]
    MissingWireEndpoint {
        /// The missing endpoint
        id: RevisionId,
        /// Importer side of the rejected wire
        importer: RevisionId,
        /// Exporter side of the rejected wire
        exporter: RevisionId,
    },

    /// A wire would connect a revision to itself
    #[error("Wire importer and exporter are the same revision: {id}")]
    SelfWire {
        /// The offending revision
        id: RevisionId,
    },

    /// Operation on a module that has been uninstalled
    #[error("Module {id} has been uninstalled")]
    ModuleGone {
        /// The uninstalled module
        id: ModuleId,
    },

    /// Revision metadata failed validation
    #[error("Invalid metadata for '{name}': {message}")]
    InvalidMetadata {
        /// Symbolic name of the offending revision
        name: String,
        /// What was wrong
        message: String,
    },
}
