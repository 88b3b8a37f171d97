// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Control-plane loader for the nexus-hv partitioning hypervisor
//! OWNERS: @kernel-team
//! STATUS: Functional (host backend)
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module + tests/protocol.rs
//! PUBLIC API: Loader, ControlSurface, Status, DriverConfig, HvError, hal traits, host::SimMachine
//! DEPENDS_ON: nexus-hv-abi, log, parking_lot, serde, thiserror, toml
//! INVARIANTS:
//!   - Enable, disable and cell creation are serialised by one coordination lock
//!   - Every online core enters or leaves the hypervisor in one rendezvous; the
//!     caller observes the result only after all cores reported
//!   - Failures before the rendezvous are fully unwound by scoped guards
//!   - A failed disable rendezvous keeps the system enabled with memory mapped
//! ADR: docs/adr/0030-hypervisor-partitioning.md

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod barrier;
pub mod cell;
pub mod config;
pub mod control;
pub mod cpu;
mod disable;
mod enable;
pub mod error;
pub mod hal;
pub mod layout;
pub mod lock;
pub mod region;
pub mod state;

#[cfg(feature = "backend-host")]
pub mod host;

pub use cell::CellSpec;
pub use config::{ConfigError, DriverConfig};
pub use control::ControlSurface;
pub use cpu::{CpuId, CpuSet};
pub use error::{HvError, Result};
pub use hal::Platform;
pub use state::{ActivationState, Status};

use parking_lot::RwLock;

use crate::lock::CoordinationLock;
use crate::state::LoaderState;

/// System-wide coordinator. One instance exists per control device.
pub struct Loader {
    platform: Platform,
    config: DriverConfig,
    state: CoordinationLock<LoaderState>,
    status: RwLock<Status>,
}

impl Loader {
    /// Creates a loader in the `Disabled` state.
    pub fn new(platform: Platform, config: DriverConfig) -> Self {
        let poll = config.lock_poll();
        Self {
            platform,
            config,
            state: CoordinationLock::new(LoaderState::default(), poll),
            status: RwLock::new(Status::default()),
        }
    }

    /// Driver configuration in effect.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Snapshot of the last committed state. Never shows a transient state.
    pub fn status(&self) -> Status {
        self.status.read().clone()
    }

    // Called with the coordination lock held, just before it is released.
    fn publish(&self, state: &LoaderState) {
        *self.status.write() = state.snapshot();
    }
}
