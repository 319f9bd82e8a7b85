//! Capabilities and requirements
//!
//! A capability is a namespaced, attributed fact a revision offers; a
//! requirement is a namespaced filter a revision declares. The resolver
//! pairs them into wires.

use rustc_hash::FxHashMap;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace for exported packages
pub const PACKAGE_NAMESPACE: &str = "wiring.package";

/// Namespace for requirable module identities
pub const MODULE_NAMESPACE: &str = "wiring.module";

/// Namespace for fragment attachment points
pub const HOST_NAMESPACE: &str = "wiring.host";

/// Namespace for revision identity
pub const IDENTITY_NAMESPACE: &str = "identity";

/// A namespaced, attributed fact a revision offers
///
/// Capabilities are immutable and compared structurally by namespace, name,
/// version and attribute set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Capability namespace
    pub namespace: String,
    /// Primary name within the namespace (package name, module name, ...)
    pub name: String,
    /// Offered version
    pub version: Version,
    /// Additional attributes matched exactly by requirements
    #[serde(default)]
    pub attributes: FxHashMap<String, serde_json::Value>,
}

impl Capability {
    /// Create a capability in the given namespace
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, version: Version) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version,
            attributes: FxHashMap::default(),
        }
    }

    /// Create an exported-package capability
    pub fn package(name: impl Into<String>, version: Version) -> Self {
        Self::new(PACKAGE_NAMESPACE, name, version)
    }

    /// Create a requirable-module capability
    pub fn module(name: impl Into<String>, version: Version) -> Self {
        Self::new(MODULE_NAMESPACE, name, version)
    }

    /// Create a fragment-host capability
    pub fn host(name: impl Into<String>, version: Version) -> Self {
        Self::new(HOST_NAMESPACE, name, version)
    }

    /// Create an identity capability
    pub fn identity(name: impl Into<String>, version: Version) -> Self {
        Self::new(IDENTITY_NAMESPACE, name, version)
    }

    /// Attach an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}; name={}; version={}", self.namespace, self.name, self.version)
    }
}

/// Whether an unsatisfied requirement fails its revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequirementMode {
    /// Resolution fails if no provider matches
    Mandatory,
    /// The requirement is dropped if no provider matches
    Optional,
}

/// Whether a require-module wire re-offers the provider to dependents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// The importer does not re-expose what it imports
    Private,
    /// The provider's capabilities are re-offered to the importer's own
    /// dependents (require-module style only)
    Reexport,
}

/// A namespaced filter a revision declares, needing a matching capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    /// Namespace the requirement searches
    pub namespace: String,
    /// Required name within the namespace
    pub name: String,
    /// Acceptable version range
    pub version: VersionReq,
    /// Mandatory or optional
    pub mode: RequirementMode,
    /// Private or reexport (meaningful for require-module only)
    pub visibility: Visibility,
    /// Additional attributes that must match exactly
    #[serde(default)]
    pub attributes: FxHashMap<String, serde_json::Value>,
}

impl Requirement {
    /// Create a mandatory requirement in the given namespace
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: VersionReq::STAR,
            mode: RequirementMode::Mandatory,
            visibility: Visibility::Private,
            attributes: FxHashMap::default(),
        }
    }

    /// Create a package-import requirement
    pub fn package(name: impl Into<String>) -> Self {
        Self::new(PACKAGE_NAMESPACE, name)
    }

    /// Create a require-module requirement
    pub fn module(name: impl Into<String>) -> Self {
        Self::new(MODULE_NAMESPACE, name)
    }

    /// Create a fragment-host requirement
    pub fn host(name: impl Into<String>) -> Self {
        Self::new(HOST_NAMESPACE, name)
    }

    /// Restrict the acceptable version range
    pub fn with_version(mut self, version: VersionReq) -> Self {
        self.version = version;
        self
    }

    /// Mark the requirement optional
    pub fn optional(mut self) -> Self {
        self.mode = RequirementMode::Optional;
        self
    }

    /// Mark the requirement as reexporting its provider
    pub fn reexport(mut self) -> Self {
        self.visibility = Visibility::Reexport;
        self
    }

    /// Attach an attribute filter
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Whether the requirement is mandatory
    pub fn is_mandatory(&self) -> bool {
        self.mode == RequirementMode::Mandatory
    }

    /// Check whether a capability satisfies this requirement
    ///
    /// Namespace and name must match, the capability version must fall in
    /// the required range, and every filter attribute must be present on
    /// the capability with an equal value.
    pub fn matches(&self, capability: &Capability) -> bool {
        if self.namespace != capability.namespace || self.name != capability.name {
            return false;
        }
        if !self.version.matches(&capability.version) {
            return false;
        }
        self.attributes
            .iter()
            .all(|(key, value)| capability.attributes.get(key) == Some(value))
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}; name={}; version={}", self.namespace, self.name, self.version)?;
        if self.mode == RequirementMode::Optional {
            write!(f, "; optional")?;
        }
        Ok(())
    }
}
