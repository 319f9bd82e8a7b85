//! Framework configuration

use modulith_resolver::Platform;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Framework configuration
///
/// The framework only reads already-parsed values; mapping an external
/// property file onto this struct is the embedder's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Start level the framework begins at
    pub begin_start_level: u32,
    /// Start level assigned to newly installed modules
    pub initial_module_start_level: u32,
    /// Bounded wait for module and wiring locks, in milliseconds
    pub lock_timeout_ms: u64,
    /// Packages exported by the system revision
    pub system_packages: Vec<String>,
    /// Platform override for native-code selection; detected when absent
    #[serde(default)]
    pub platform: Option<Platform>,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            begin_start_level: 1,
            initial_module_start_level: 1,
            lock_timeout_ms: 30_000,
            system_packages: Vec::new(),
            platform: None,
        }
    }
}

impl FrameworkConfig {
    /// Configuration with short lock waits, for tests
    pub fn testing() -> Self {
        Self {
            lock_timeout_ms: 500,
            ..Self::default()
        }
    }

    /// Set the packages the system revision exports
    pub fn with_system_packages(mut self, packages: impl IntoIterator<Item = String>) -> Self {
        self.system_packages = packages.into_iter().collect();
        self
    }

    /// The bounded lock wait as a duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FrameworkConfig::default();
        assert_eq!(config.begin_start_level, 1);
        assert_eq!(config.lock_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = FrameworkConfig::default()
            .with_system_packages(["system.api".to_string()]);
        let text = serde_json::to_string(&config).unwrap();
        let back: FrameworkConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.system_packages, vec!["system.api"]);
    }
}
