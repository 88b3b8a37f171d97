// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Driver configuration loaded from TOML.
//!
//! ```toml
//! firmware_name = "nexus-hv.bin"
//! page_size = 4096
//! min_cell_memory = 1048576
//! barrier_stall_warn_spins = 10000000
//! lock_poll_ms = 10
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading a [`DriverConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML text could not be parsed.
    #[error("driver config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// A field holds an unusable value.
    #[error("driver config: {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Tunables of the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Name of the hypervisor image in the firmware store.
    pub firmware_name: String,
    /// Page size the image core is aligned to.
    pub page_size: u64,
    /// Smallest RAM region accepted for a cell.
    pub min_cell_memory: u64,
    /// Idle spins after which a stalled rendezvous is reported once.
    pub barrier_stall_warn_spins: u64,
    /// Interval at which lock waiters re-check for pending signals.
    pub lock_poll_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            firmware_name: "nexus-hv.bin".to_string(),
            page_size: 4096,
            min_cell_memory: 1024 * 1024,
            barrier_stall_warn_spins: 10_000_000,
            lock_poll_ms: 10,
        }
    }
}

impl DriverConfig {
    /// Parses and validates a configuration. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.firmware_name.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "firmware_name", reason: "must not be empty" });
        }
        if !self.page_size.is_power_of_two() {
            return Err(ConfigError::Invalid { field: "page_size", reason: "must be a power of two" });
        }
        if self.barrier_stall_warn_spins == 0 {
            return Err(ConfigError::Invalid { field: "barrier_stall_warn_spins", reason: "must be positive" });
        }
        if self.lock_poll_ms == 0 {
            return Err(ConfigError::Invalid { field: "lock_poll_ms", reason: "must be positive" });
        }
        Ok(())
    }

    pub(crate) fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(DriverConfig::from_toml_str("").expect("parse"), DriverConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = DriverConfig::from_toml_str("firmware_name = \"hv-test.bin\"\npage_size = 16384\n")
            .expect("parse");
        assert_eq!(config.firmware_name, "hv-test.bin");
        assert_eq!(config.page_size, 16384);
        assert_eq!(config.min_cell_memory, 1024 * 1024);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = DriverConfig::from_toml_str("page_size = 3000").expect_err("page size");
        assert!(matches!(err, ConfigError::Invalid { field: "page_size", .. }));
        let err = DriverConfig::from_toml_str("firmware_name = \"  \"").expect_err("name");
        assert!(matches!(err, ConfigError::Invalid { field: "firmware_name", .. }));
        let err = DriverConfig::from_toml_str("barrier_stall_warn_spins = 0").expect_err("spins");
        assert!(matches!(err, ConfigError::Invalid { field: "barrier_stall_warn_spins", .. }));
        let err = DriverConfig::from_toml_str("lock_poll_ms = 0").expect_err("poll");
        assert!(matches!(err, ConfigError::Invalid { field: "lock_poll_ms", .. }));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = DriverConfig::from_toml_str("firmware = \"x\"").expect_err("unknown key");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
