//! Native-code clause selection
//!
//! A revision may declare platform-conditional native library clauses.
//! Selection runs as a post-resolve step: clauses are filtered against the
//! current platform and ordered by OS version floor descending, then
//! language-specified clauses first, then declaration order.

use modulith_core::{NativeClause, NativeCode};
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// The platform native clauses are matched against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system name (lower case)
    pub os_name: String,
    /// Processor architecture name (lower case)
    pub processor: String,
    /// OS version, when known
    #[serde(default)]
    pub os_version: Option<Version>,
    /// Language, when configured
    #[serde(default)]
    pub language: Option<String>,
}

impl Platform {
    /// Detect the platform of the running process
    pub fn current() -> Self {
        Self {
            os_name: std::env::consts::OS.to_string(),
            processor: std::env::consts::ARCH.to_string(),
            os_version: None,
            language: None,
        }
    }

    fn matches(&self, clause: &NativeClause) -> bool {
        if !clause.os_names.is_empty()
            && !clause.os_names.iter().any(|os| os.eq_ignore_ascii_case(&self.os_name))
        {
            return false;
        }
        if !clause.processors.is_empty()
            && !clause
                .processors
                .iter()
                .any(|p| p.eq_ignore_ascii_case(&self.processor))
        {
            return false;
        }
        if let (Some(floor), Some(version)) = (&clause.os_version_floor, &self.os_version) {
            if version < floor {
                return false;
            }
        }
        if !clause.languages.is_empty() {
            match &self.language {
                Some(language) if clause.languages.iter().any(|l| l.eq_ignore_ascii_case(language)) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Select the native clause to stage for the given platform
///
/// Returns `None` when the revision declares no clauses, or when no clause
/// matches and the clause set is optional. The caller fails the revision
/// when `None` comes back for a non-optional set with candidates.
pub fn select_clause<'a>(native: &'a NativeCode, platform: &Platform) -> Option<&'a NativeClause> {
    let mut matching: Vec<(usize, &NativeClause)> = native
        .clauses
        .iter()
        .enumerate()
        .filter(|(_, clause)| platform.matches(clause))
        .collect();

    // Floor descending (clauses without a floor last), language-specified
    // clauses first, declaration order as the final key.
    matching.sort_by(|(ia, a), (ib, b)| {
        let floor = b.os_version_floor.cmp(&a.os_version_floor);
        floor
            .then_with(|| a.languages.is_empty().cmp(&b.languages.is_empty()))
            .then_with(|| ia.cmp(ib))
    });

    let selected = matching.first().map(|(_, clause)| *clause);
    trace!(
        "Native selection on {}/{}: {} of {} clauses match",
        platform.os_name,
        platform.processor,
        matching.len(),
        native.clauses.len()
    );
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(os: &str, libraries: &[&str]) -> NativeClause {
        NativeClause {
            libraries: libraries.iter().map(|s| s.to_string()).collect(),
            os_names: vec![os.to_string()],
            processors: vec![],
            languages: vec![],
            os_version_floor: None,
        }
    }

    fn platform(os: &str) -> Platform {
        Platform {
            os_name: os.to_string(),
            processor: "x86_64".to_string(),
            os_version: None,
            language: None,
        }
    }

    #[test]
    fn test_selects_matching_os() {
        let native = NativeCode {
            clauses: vec![clause("windows", &["a.dll"]), clause("linux", &["a.so"])],
            optional: false,
        };
        let selected = select_clause(&native, &platform("linux")).unwrap();
        assert_eq!(selected.libraries, vec!["a.so"]);
    }

    #[test]
    fn test_no_match_returns_none() {
        let native = NativeCode {
            clauses: vec![clause("windows", &["a.dll"])],
            optional: false,
        };
        assert!(select_clause(&native, &platform("linux")).is_none());
    }

    #[test]
    fn test_higher_version_floor_preferred() {
        let mut old = clause("linux", &["old.so"]);
        old.os_version_floor = Some(Version::new(3, 0, 0));
        let mut new = clause("linux", &["new.so"]);
        new.os_version_floor = Some(Version::new(5, 0, 0));

        let native = NativeCode {
            clauses: vec![old, new],
            optional: false,
        };
        let mut plat = platform("linux");
        plat.os_version = Some(Version::new(6, 1, 0));

        let selected = select_clause(&native, &plat).unwrap();
        assert_eq!(selected.libraries, vec!["new.so"]);
    }

    #[test]
    fn test_version_floor_excludes_newer_requirement() {
        let mut needs_new = clause("linux", &["new.so"]);
        needs_new.os_version_floor = Some(Version::new(5, 0, 0));

        let native = NativeCode {
            clauses: vec![needs_new, clause("linux", &["any.so"])],
            optional: false,
        };
        let mut plat = platform("linux");
        plat.os_version = Some(Version::new(4, 0, 0));

        let selected = select_clause(&native, &plat).unwrap();
        assert_eq!(selected.libraries, vec!["any.so"]);
    }

    #[test]
    fn test_language_specified_clause_preferred() {
        let mut localized = clause("linux", &["fr.so"]);
        localized.languages = vec!["fr".to_string()];

        let native = NativeCode {
            clauses: vec![clause("linux", &["plain.so"]), localized],
            optional: false,
        };
        let mut plat = platform("linux");
        plat.language = Some("fr".to_string());

        let selected = select_clause(&native, &plat).unwrap();
        assert_eq!(selected.libraries, vec!["fr.so"]);
    }

    #[test]
    fn test_declaration_order_breaks_remaining_ties() {
        let native = NativeCode {
            clauses: vec![clause("linux", &["first.so"]), clause("linux", &["second.so"])],
            optional: false,
        };
        let selected = select_clause(&native, &platform("linux")).unwrap();
        assert_eq!(selected.libraries, vec!["first.so"]);
    }
}
