//! Modules, revisions and declared metadata
//!
//! A revision is an immutable snapshot of a module's declared capabilities
//! and requirements. Wires address revisions by stable integer ids so the
//! dependency graph can be torn down and rebuilt without dangling
//! references.

use once_cell::sync::OnceCell;
use rustc_hash::FxHasher;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::capability::{
    Capability, Requirement, HOST_NAMESPACE, IDENTITY_NAMESPACE, MODULE_NAMESPACE,
};
use crate::error::{CoreError, Result};

/// Stable identity of a module across its revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Stable identity of one revision in the environment arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevisionId(pub u32);

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "revision#{}", self.0)
    }
}

/// One platform-conditional native library clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeClause {
    /// Library paths staged by this clause, relative to the content root
    pub libraries: Vec<String>,
    /// Acceptable operating system names (empty = any)
    #[serde(default)]
    pub os_names: Vec<String>,
    /// Acceptable processor names (empty = any)
    #[serde(default)]
    pub processors: Vec<String>,
    /// Acceptable languages (empty = any)
    #[serde(default)]
    pub languages: Vec<String>,
    /// Minimum acceptable OS version
    #[serde(default)]
    pub os_version_floor: Option<Version>,
}

/// A revision's native-code declaration: an ordered clause list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeCode {
    /// Candidate clauses in declaration order
    pub clauses: Vec<NativeClause>,
    /// When true, no matching clause selects nothing instead of failing
    #[serde(default)]
    pub optional: bool,
}

/// Lazy-activation policy: which local paths trigger on-demand start
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivationPolicy {
    /// Paths that trigger activation (empty = all local content)
    #[serde(default)]
    pub include: Vec<String>,
    /// Paths excluded from triggering
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Parsed declarative metadata for one revision
///
/// This is the metadata-provider boundary object: whatever parses module
/// manifests hands the resolver one of these per revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionMetadata {
    /// Symbolic name of the owning module
    pub symbolic_name: String,
    /// Revision version
    pub version: Version,
    /// Declared capabilities (including the implicit identity capabilities
    /// added at build time for non-fragments)
    pub capabilities: Vec<Capability>,
    /// Declared requirements, in declaration order
    pub requirements: Vec<Requirement>,
    /// The single host requirement of a fragment revision
    #[serde(default)]
    pub fragment_host: Option<Requirement>,
    /// Native-code clauses, if any
    #[serde(default)]
    pub native: Option<NativeCode>,
    /// Lazy-activation policy, if declared
    #[serde(default)]
    pub activation: Option<ActivationPolicy>,
    /// Content entry paths (used to verify selected native libraries)
    #[serde(default)]
    pub content: Vec<String>,
}

impl RevisionMetadata {
    /// Start building metadata for the named module
    pub fn builder(symbolic_name: impl Into<String>, version: Version) -> MetadataBuilder {
        MetadataBuilder::new(symbolic_name, version)
    }

    /// Whether this revision is a fragment
    pub fn is_fragment(&self) -> bool {
        self.fragment_host.is_some()
    }
}

/// Builder for revision metadata
pub struct MetadataBuilder {
    symbolic_name: String,
    version: Version,
    capabilities: Vec<Capability>,
    requirements: Vec<Requirement>,
    fragment_host: Option<Requirement>,
    native: Option<NativeCode>,
    activation: Option<ActivationPolicy>,
    content: Vec<String>,
}

impl MetadataBuilder {
    /// Create a builder for the named module
    pub fn new(symbolic_name: impl Into<String>, version: Version) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version,
            capabilities: Vec::new(),
            requirements: Vec::new(),
            fragment_host: None,
            native: None,
            activation: None,
            content: Vec::new(),
        }
    }

    /// Declare an exported package
    pub fn export_package(mut self, name: impl Into<String>, version: Version) -> Self {
        self.capabilities.push(Capability::package(name, version));
        self
    }

    /// Declare a package import
    pub fn import_package(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Declare a require-module dependency
    pub fn require_module(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Declare an arbitrary capability
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Declare an arbitrary requirement
    pub fn requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Make this revision a fragment of the named host
    pub fn fragment_of(mut self, host: Requirement) -> Self {
        self.fragment_host = Some(host);
        self
    }

    /// Declare native-code clauses
    pub fn native(mut self, native: NativeCode) -> Self {
        self.native = Some(native);
        self
    }

    /// Declare a lazy-activation policy
    pub fn activation(mut self, policy: ActivationPolicy) -> Self {
        self.activation = Some(policy);
        self
    }

    /// Add a content entry path
    pub fn content_entry(mut self, path: impl Into<String>) -> Self {
        self.content.push(path.into());
        self
    }

    /// Validate and build the metadata
    ///
    /// Non-fragment revisions receive their implicit identity, module and
    /// host capabilities here, derived from the symbolic name and version.
    pub fn build(mut self) -> Result<RevisionMetadata> {
        if self.symbolic_name.is_empty() {
            return Err(CoreError::InvalidMetadata {
                name: String::new(),
                message: "symbolic name must not be empty".to_string(),
            });
        }
        if let Some(host) = &self.fragment_host {
            if host.namespace != HOST_NAMESPACE {
                return Err(CoreError::InvalidMetadata {
                    name: self.symbolic_name,
                    message: format!(
                        "fragment host requirement must use the {} namespace",
                        HOST_NAMESPACE
                    ),
                });
            }
        } else {
            self.capabilities.push(Capability::identity(
                self.symbolic_name.clone(),
                self.version.clone(),
            ));
            self.capabilities
                .push(Capability::module(self.symbolic_name.clone(), self.version.clone()));
            self.capabilities
                .push(Capability::host(self.symbolic_name.clone(), self.version.clone()));
        }

        Ok(RevisionMetadata {
            symbolic_name: self.symbolic_name,
            version: self.version,
            capabilities: self.capabilities,
            requirements: self.requirements,
            fragment_host: self.fragment_host,
            native: self.native,
            activation: self.activation,
            content: self.content,
        })
    }
}

/// An immutable snapshot of a module's declared metadata
#[derive(Debug)]
pub struct Revision {
    id: RevisionId,
    module: ModuleId,
    metadata: RevisionMetadata,
    token: OnceCell<u64>,
}

impl Revision {
    /// Create a revision; only the environment constructs these
    pub(crate) fn new(id: RevisionId, module: ModuleId, metadata: RevisionMetadata) -> Self {
        Self {
            id,
            module,
            metadata,
            token: OnceCell::new(),
        }
    }

    /// Stable id of this revision
    pub fn id(&self) -> RevisionId {
        self.id
    }

    /// Owning module
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Declared metadata
    pub fn metadata(&self) -> &RevisionMetadata {
        &self.metadata
    }

    /// Symbolic name of the owning module
    pub fn symbolic_name(&self) -> &str {
        &self.metadata.symbolic_name
    }

    /// Revision version
    pub fn version(&self) -> &Version {
        &self.metadata.version
    }

    /// Whether this revision is a fragment
    pub fn is_fragment(&self) -> bool {
        self.metadata.is_fragment()
    }

    /// Declared capabilities in the given namespace
    pub fn capabilities<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a Capability> + 'a {
        self.metadata
            .capabilities
            .iter()
            .filter(move |cap| cap.namespace == namespace)
    }

    /// Declared requirements in the given namespace
    pub fn requirements<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a Requirement> + 'a {
        self.metadata
            .requirements
            .iter()
            .filter(move |req| req.namespace == namespace)
    }

    /// Cached opaque identifier for this revision
    ///
    /// Computed once per revision and reused across resolve calls.
    pub fn token(&self) -> u64 {
        *self.token.get_or_init(|| {
            let mut hasher = FxHasher::default();
            self.id.0.hash(&mut hasher);
            self.metadata.symbolic_name.hash(&mut hasher);
            self.metadata.version.to_string().hash(&mut hasher);
            hasher.finish()
        })
    }

    /// The revision's own module capability, if it is not a fragment
    pub fn module_capability(&self) -> Option<&Capability> {
        self.capabilities(MODULE_NAMESPACE).next()
    }

    /// The revision's identity capability, if it is not a fragment
    pub fn identity(&self) -> Option<&Capability> {
        self.capabilities(IDENTITY_NAMESPACE).next()
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.metadata.symbolic_name, self.metadata.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::PACKAGE_NAMESPACE;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_builder_adds_implicit_capabilities() {
        let metadata = RevisionMetadata::builder("app", v("1.0.0"))
            .export_package("app.api", v("1.0.0"))
            .build()
            .unwrap();

        let namespaces: Vec<_> = metadata.capabilities.iter().map(|c| c.namespace.as_str()).collect();
        assert!(namespaces.contains(&PACKAGE_NAMESPACE));
        assert!(namespaces.contains(&MODULE_NAMESPACE));
        assert!(namespaces.contains(&HOST_NAMESPACE));
        assert!(namespaces.contains(&IDENTITY_NAMESPACE));
    }

    #[test]
    fn test_fragment_gets_no_implicit_capabilities() {
        let metadata = RevisionMetadata::builder("app.nls", v("1.0.0"))
            .fragment_of(Requirement::host("app"))
            .export_package("app.nls", v("1.0.0"))
            .build()
            .unwrap();

        assert!(metadata.is_fragment());
        assert!(metadata.capabilities.iter().all(|c| c.namespace == PACKAGE_NAMESPACE));
    }

    #[test]
    fn test_fragment_host_must_use_host_namespace() {
        let result = RevisionMetadata::builder("app.nls", v("1.0.0"))
            .fragment_of(Requirement::package("app"))
            .build();
        assert!(matches!(result, Err(CoreError::InvalidMetadata { .. })));
    }

    #[test]
    fn test_revision_token_is_stable() {
        let metadata = RevisionMetadata::builder("app", v("1.0.0")).build().unwrap();
        let revision = Revision::new(RevisionId(7), ModuleId(1), metadata);
        assert_eq!(revision.token(), revision.token());
    }
}
