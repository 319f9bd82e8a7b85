//! Resolution error types

use modulith_core::{CoreError, Requirement, RevisionId};
use std::fmt;
use thiserror::Error;

/// Type alias for resolver results
pub type Result<T> = std::result::Result<T, ResolveError>;

/// The unsatisfied requirements of a failed revision, printable for users
#[derive(Debug, Clone, PartialEq)]
pub struct UnsatisfiedSet(pub Vec<Requirement>);

impl fmt::Display for UnsatisfiedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, requirement) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[{}]", requirement)?;
        }
        Ok(())
    }
}

/// Errors that can occur during resolution
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// One or more mandatory requirements could not be satisfied
    #[error("Unable to resolve {name} ({revision}): missing requirements {missing}")]
    Unsatisfied {
        /// The failed revision
        revision: RevisionId,
        /// Symbolic name of the failed revision
        name: String,
        /// The unsatisfied mandatory requirements
        missing: UnsatisfiedSet,
    },

    /// No native-code clause matched the current platform
    #[error("No native-code clause of {name} ({revision}) matches the platform")]
    NoNativeMatch {
        /// The failed revision
        revision: RevisionId,
        /// Symbolic name of the failed revision
        name: String,
    },

    /// A selected native library is missing from the revision content
    #[error("Native library '{library}' of {name} ({revision}) is missing from its content")]
    MissingNativeLibrary {
        /// The failed revision
        revision: RevisionId,
        /// Symbolic name of the failed revision
        name: String,
        /// The missing library path
        library: String,
    },

    /// A consistency violation in the dependency model
    #[error(transparent)]
    Core(#[from] CoreError),
}
