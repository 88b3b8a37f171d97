// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host backend: a simulated machine implementing every collaborator trait.
//!
//! Physical memory is sparse and zero-initialised, each simulated core is a
//! scoped thread during broadcasts, and the simulated hypervisor validates
//! what the loader hands it. Failures can be injected at every boundary.

mod caller;
mod cpus;
mod firmware;
mod hypervisor;
mod mapper;
mod memory;

pub use caller::{HostCaller, SimModule};
pub use cpus::SimCpus;
pub use firmware::{build_image, SimFirmwareStore};
pub use hypervisor::{SimCell, SimHypervisor};
pub use mapper::{SimMapper, SimMapping};
pub use memory::SimPhysMemory;

use std::sync::Arc;

use crate::hal::Platform;

pub(crate) const PAGE: u64 = 4096;

pub(crate) fn page_align(value: u64) -> u64 {
    value.div_ceil(PAGE) * PAGE
}

/// All simulated collaborators of one machine.
pub struct SimMachine {
    /// Physical memory shared by mapper and hypervisor.
    pub memory: Arc<SimPhysMemory>,
    /// Mapper over [`SimMachine::memory`].
    pub mapper: Arc<SimMapper>,
    /// Simulated cores.
    pub cpus: Arc<SimCpus>,
    /// Simulated hypervisor.
    pub hypervisor: Arc<SimHypervisor>,
    /// In-memory firmware store.
    pub firmware: Arc<SimFirmwareStore>,
    /// Module reference count.
    pub module: Arc<SimModule>,
}

impl SimMachine {
    /// Machine with `num_cpus` possible cores, all online.
    pub fn new(num_cpus: usize) -> Self {
        let memory = Arc::new(SimPhysMemory::new());
        Self {
            mapper: Arc::new(SimMapper::new(Arc::clone(&memory))),
            cpus: Arc::new(SimCpus::new(num_cpus)),
            hypervisor: Arc::new(SimHypervisor::new(Arc::clone(&memory))),
            firmware: Arc::new(SimFirmwareStore::default()),
            module: Arc::new(SimModule::default()),
            memory,
        }
    }

    /// Collaborators as trait objects for [`crate::Loader::new`].
    pub fn platform(&self) -> Platform {
        Platform {
            mapper: self.mapper.clone(),
            cpus: self.cpus.clone(),
            firmware: self.firmware.clone(),
            hypervisor: self.hypervisor.clone(),
            module: self.module.clone(),
        }
    }
}
