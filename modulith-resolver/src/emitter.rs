//! Dependency description emission
//!
//! Translates a revision's accepted wiring into the description the
//! class-loading substrate consumes: one entry per distinct exporter
//! revision, an implicit system entry first, and path filters computed from
//! the wire kinds. Filters are backed by ordered sets so emission is
//! reproducible for identical wirings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use modulith_core::{
    ActivationPolicy, Environment, RevisionId, Visibility, Wiring, MODULE_NAMESPACE,
    PACKAGE_NAMESPACE,
};

use crate::error::Result;

/// A path filter over package-style names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathFilter {
    /// Admits every name (open pass-through)
    All,
    /// Admits nothing
    None,
    /// Admits exactly the named paths
    Include(BTreeSet<String>),
    /// Admits everything but the named paths
    Exclude(BTreeSet<String>),
}

impl PathFilter {
    /// Whether the filter admits a name
    pub fn admits(&self, name: &str) -> bool {
        match self {
            PathFilter::All => true,
            PathFilter::None => false,
            PathFilter::Include(names) => names.contains(name),
            PathFilter::Exclude(names) => !names.contains(name),
        }
    }

    fn include(names: BTreeSet<String>) -> Self {
        if names.is_empty() {
            PathFilter::None
        } else {
            PathFilter::Include(names)
        }
    }

    fn exclude(names: BTreeSet<String>) -> Self {
        if names.is_empty() {
            PathFilter::All
        } else {
            PathFilter::Exclude(names)
        }
    }
}

/// One dependency on an exporter revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEntry {
    /// The exporter revision
    pub exporter: RevisionId,
    /// Names the importer may load through this dependency
    pub imports: PathFilter,
    /// Names the importer re-exposes to its own dependents through this
    /// dependency (open for reexport require-module wires, closed for
    /// plain imports)
    pub exports: PathFilter,
}

/// Split of local paths into eagerly and lazily loadable sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationSplit {
    /// Paths loadable without activating the module
    pub eager: PathFilter,
    /// Paths whose first access triggers on-demand activation
    pub lazy: PathFilter,
}

/// The dependency description handed to the class-loading substrate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyDescription {
    /// The revision being described
    pub revision: RevisionId,
    /// Dependencies in order, the system entry first
    pub entries: Vec<DependencyEntry>,
    /// Filter over the revision's own content, excluding whatever explicit
    /// imports satisfied
    pub local: PathFilter,
    /// Lazy-activation split, when the revision declares a policy
    pub activation: Option<ActivationSplit>,
}

/// Emits dependency descriptions from wirings
pub struct WiringEmitter<'e> {
    env: &'e Environment,
}

impl<'e> WiringEmitter<'e> {
    /// Create an emitter over the given environment
    pub fn new(env: &'e Environment) -> Self {
        Self { env }
    }

    /// Produce the dependency description for a wiring
    pub fn emit(&self, wiring: &Wiring) -> Result<DependencyDescription> {
        let revision = self.env.revision(wiring.revision)?;
        let system = self.env.system();

        // Names satisfied by explicit package imports, by exporter.
        let mut import_names: BTreeSet<String> = BTreeSet::new();
        for wire in &wiring.required {
            if wire.requirement.namespace == PACKAGE_NAMESPACE {
                import_names.insert(wire.capability.name.clone());
            }
        }

        let mut entries = Vec::new();
        if let Some(system) = system {
            if system != wiring.revision {
                entries.push(DependencyEntry {
                    exporter: system,
                    imports: PathFilter::All,
                    exports: PathFilter::None,
                });
            }
        }

        for exporter in wiring.exporters() {
            if Some(exporter) == system {
                continue;
            }

            let mut package_names: BTreeSet<String> = BTreeSet::new();
            let mut has_module_wire = false;
            let mut reexport = false;
            for wire in wiring.wires_to(exporter) {
                match wire.requirement.namespace.as_str() {
                    PACKAGE_NAMESPACE => {
                        package_names.insert(wire.capability.name.clone());
                    }
                    MODULE_NAMESPACE => {
                        has_module_wire = true;
                        reexport |= wire.requirement.visibility == Visibility::Reexport;
                    }
                    _ => {}
                }
            }

            let imports = if has_module_wire {
                // A require-module wire opens the exporter's whole export
                // set, minus names an explicit import sourced elsewhere.
                let shadowed: BTreeSet<String> = import_names
                    .iter()
                    .filter(|name| !package_names.contains(*name))
                    .cloned()
                    .collect();
                PathFilter::exclude(shadowed)
            } else {
                PathFilter::include(package_names)
            };

            entries.push(DependencyEntry {
                exporter,
                imports,
                exports: if reexport { PathFilter::All } else { PathFilter::None },
            });
        }

        let local = PathFilter::exclude(import_names);
        let activation = revision.metadata().activation.as_ref().map(split_activation);

        Ok(DependencyDescription {
            revision: wiring.revision,
            entries,
            local,
            activation,
        })
    }
}

/// Compute the eager/lazy split for an activation policy
fn split_activation(policy: &ActivationPolicy) -> ActivationSplit {
    let exclude: BTreeSet<String> = policy.exclude.iter().cloned().collect();
    if policy.include.is_empty() {
        // Everything triggers activation except the excluded paths.
        ActivationSplit {
            eager: PathFilter::include(exclude.clone()),
            lazy: PathFilter::exclude(exclude),
        }
    } else {
        let trigger: BTreeSet<String> = policy
            .include
            .iter()
            .filter(|name| !exclude.contains(*name))
            .cloned()
            .collect();
        ActivationSplit {
            eager: PathFilter::exclude(trigger.clone()),
            lazy: PathFilter::include(trigger),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modulith_core::{
        Capability, ModuleId, Requirement, RevisionMetadata, Wire,
    };
    use semver::Version;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    struct Fixture {
        env: Environment,
        importer: RevisionId,
        exporter: RevisionId,
    }

    fn fixture() -> Fixture {
        let env = Environment::new();
        let exporter = env.install(
            ModuleId(1),
            RevisionMetadata::builder("lib", v("1.0.0"))
                .export_package("a", v("1.0.0"))
                .export_package("b", v("1.0.0"))
                .build()
                .unwrap(),
        );
        let importer = env.install(
            ModuleId(2),
            RevisionMetadata::builder("app", v("1.0.0")).build().unwrap(),
        );
        Fixture {
            env,
            importer: importer.id(),
            exporter: exporter.id(),
        }
    }

    fn package_wire(f: &Fixture, name: &str) -> Wire {
        Wire::new(
            Requirement::package(name),
            Capability::package(name, v("1.0.0")),
            f.importer,
            f.exporter,
        )
    }

    fn module_wire(f: &Fixture, reexport: bool) -> Wire {
        let mut requirement = Requirement::module("lib");
        if reexport {
            requirement = requirement.reexport();
        }
        Wire::new(
            requirement,
            Capability::module("lib", v("1.0.0")),
            f.importer,
            f.exporter,
        )
    }

    #[test]
    fn test_package_wires_collapse_into_one_entry() {
        let f = fixture();
        let wiring = Wiring {
            revision: f.importer,
            required: vec![package_wire(&f, "a"), package_wire(&f, "b")],
            provided: vec![],
            attached_fragments: vec![],
        };

        let description = WiringEmitter::new(&f.env).emit(&wiring).unwrap();
        assert_eq!(description.entries.len(), 1);
        let entry = &description.entries[0];
        assert_eq!(entry.exporter, f.exporter);
        assert!(entry.imports.admits("a"));
        assert!(entry.imports.admits("b"));
        assert!(!entry.imports.admits("c"));
        assert_eq!(entry.exports, PathFilter::None);
    }

    #[test]
    fn test_reexport_module_wire_opens_export_filter() {
        let f = fixture();
        let wiring = Wiring {
            revision: f.importer,
            required: vec![module_wire(&f, true)],
            provided: vec![],
            attached_fragments: vec![],
        };

        let description = WiringEmitter::new(&f.env).emit(&wiring).unwrap();
        let entry = &description.entries[0];
        assert_eq!(entry.imports, PathFilter::All);
        assert_eq!(entry.exports, PathFilter::All);
    }

    #[test]
    fn test_plain_module_wire_keeps_exports_closed() {
        let f = fixture();
        let wiring = Wiring {
            revision: f.importer,
            required: vec![module_wire(&f, false)],
            provided: vec![],
            attached_fragments: vec![],
        };

        let description = WiringEmitter::new(&f.env).emit(&wiring).unwrap();
        assert_eq!(description.entries[0].exports, PathFilter::None);
    }

    #[test]
    fn test_local_filter_excludes_imported_names() {
        let f = fixture();
        let wiring = Wiring {
            revision: f.importer,
            required: vec![package_wire(&f, "a")],
            provided: vec![],
            attached_fragments: vec![],
        };

        let description = WiringEmitter::new(&f.env).emit(&wiring).unwrap();
        assert!(!description.local.admits("a"));
        assert!(description.local.admits("own.code"));
    }

    #[test]
    fn test_import_shadows_require_module_entry() {
        let env = Environment::new();
        let lib = env.install(
            ModuleId(1),
            RevisionMetadata::builder("lib", v("1.0.0"))
                .export_package("p", v("1.0.0"))
                .build()
                .unwrap(),
        );
        let provider = env.install(
            ModuleId(2),
            RevisionMetadata::builder("provider", v("1.0.0"))
                .export_package("p", v("2.0.0"))
                .build()
                .unwrap(),
        );
        let app = env.install(
            ModuleId(3),
            RevisionMetadata::builder("app", v("1.0.0")).build().unwrap(),
        );

        // p imported from `provider`, `lib` pulled in via require-module:
        // the require-derived entry must not expose p.
        let wiring = Wiring {
            revision: app.id(),
            required: vec![
                Wire::new(
                    Requirement::package("p"),
                    Capability::package("p", v("2.0.0")),
                    app.id(),
                    provider.id(),
                ),
                Wire::new(
                    Requirement::module("lib"),
                    Capability::module("lib", v("1.0.0")),
                    app.id(),
                    lib.id(),
                ),
            ],
            provided: vec![],
            attached_fragments: vec![],
        };

        let description = WiringEmitter::new(&env).emit(&wiring).unwrap();
        let lib_entry = description
            .entries
            .iter()
            .find(|e| e.exporter == lib.id())
            .unwrap();
        assert!(!lib_entry.imports.admits("p"));
        assert!(lib_entry.imports.admits("anything.else"));
    }

    #[test]
    fn test_system_entry_comes_first() {
        let f = fixture();
        let system = f.env.install(
            ModuleId(0),
            RevisionMetadata::builder("system", v("1.0.0")).build().unwrap(),
        );
        f.env.set_system(system.id());

        let wiring = Wiring {
            revision: f.importer,
            required: vec![package_wire(&f, "a")],
            provided: vec![],
            attached_fragments: vec![],
        };

        let description = WiringEmitter::new(&f.env).emit(&wiring).unwrap();
        assert_eq!(description.entries[0].exporter, system.id());
        assert_eq!(description.entries[0].imports, PathFilter::All);
        assert_eq!(description.entries[0].exports, PathFilter::None);
        assert_eq!(description.entries[1].exporter, f.exporter);
    }

    #[test]
    fn test_activation_split_with_include_list() {
        let env = Environment::new();
        let lazy = env.install(
            ModuleId(1),
            RevisionMetadata::builder("lazy", v("1.0.0"))
                .activation(ActivationPolicy {
                    include: vec!["trigger.one".to_string(), "shared".to_string()],
                    exclude: vec!["shared".to_string()],
                })
                .build()
                .unwrap(),
        );

        let wiring = Wiring::new(lazy.id());
        let description = WiringEmitter::new(&env).emit(&wiring).unwrap();
        let split = description.activation.unwrap();
        assert!(split.lazy.admits("trigger.one"));
        assert!(!split.lazy.admits("shared"));
        assert!(split.eager.admits("shared"));
        assert!(!split.eager.admits("trigger.one"));
    }

    #[test]
    fn test_activation_split_default_include_is_everything() {
        let env = Environment::new();
        let lazy = env.install(
            ModuleId(1),
            RevisionMetadata::builder("lazy", v("1.0.0"))
                .activation(ActivationPolicy {
                    include: vec![],
                    exclude: vec!["eager.path".to_string()],
                })
                .build()
                .unwrap(),
        );

        let wiring = Wiring::new(lazy.id());
        let description = WiringEmitter::new(&env).emit(&wiring).unwrap();
        let split = description.activation.unwrap();
        assert!(split.lazy.admits("anything"));
        assert!(!split.lazy.admits("eager.path"));
        assert!(split.eager.admits("eager.path"));
    }
}
