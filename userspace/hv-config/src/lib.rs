// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: TOML front end for nexus-hv cell and system configurations
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module + tests/fixtures.rs
//! PUBLIC API: CellFile, SystemFile, compile_cell_str, compile_system_str, inspect
//! DEPENDS_ON: nexus-hv-abi (wire layout), serde + toml (file format), thiserror
//! INVARIANTS: Compiled bytes always decode with `nexus_hv_abi::CellConfig::parse`;
//!             a port is denied unless an `allow` range covers it
//! ADR: docs/adr/0030-hypervisor-partitioning.md

pub mod cell;
pub mod inspect;
pub mod system;

pub use cell::{AccessFlag, CellFile, MemoryEntry, PioSection};
pub use inspect::{inspect, CellSummary, Descriptor};
pub use system::{HypervisorMemory, SystemFile};

use thiserror::Error;

/// Demo cell shipped with the loader: core 3, 1 MiB of RAM, serial and PM-timer ports.
pub const MINIMAL_CELL: &str = include_str!("../fixtures/minimal.toml");
/// Example system configuration with a four-core root cell.
pub const EXAMPLE_SYSTEM: &str = include_str!("../fixtures/system.toml");

/// Errors raised while reading or compiling a configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// The TOML text could not be parsed.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// A field holds a value the descriptor cannot represent.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl Error {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid { field: field.into(), reason: reason.into() }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Parses a cell file and compiles it into a cell descriptor.
pub fn compile_cell_str(text: &str) -> Result<Vec<u8>> {
    CellFile::from_toml_str(text)?.compile()
}

/// Parses a system file and compiles it into a system configuration.
pub fn compile_system_str(text: &str) -> Result<Vec<u8>> {
    SystemFile::from_toml_str(text)?.compile()
}
