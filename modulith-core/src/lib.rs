//! Modulith dependency model
//!
//! This crate provides the graph vocabulary for the modulith runtime:
//! - Capabilities and requirements (namespaced, attributed, version-matched)
//! - Revisions: immutable snapshots of a module's declared metadata
//! - Wires and wirings: accepted requirement-to-capability pairings
//! - The shared dependency environment the resolver and lifecycle operate on

pub mod capability;
pub mod environment;
pub mod error;
pub mod revision;
pub mod wiring;

pub use capability::{
    Capability, Requirement, RequirementMode, Visibility, HOST_NAMESPACE, IDENTITY_NAMESPACE,
    MODULE_NAMESPACE, PACKAGE_NAMESPACE,
};
pub use environment::Environment;
pub use error::{CoreError, Result};
pub use revision::{
    ActivationPolicy, MetadataBuilder, ModuleId, NativeClause, NativeCode, Revision,
    RevisionMetadata, RevisionId,
};
pub use wiring::{Wire, Wiring};
