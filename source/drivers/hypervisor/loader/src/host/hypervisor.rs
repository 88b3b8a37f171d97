// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use nexus_hv_abi::{
    errno, hypercall, CellConfig, CellDesc, HypervisorHeader, MemoryDesc, SystemConfigHeader,
};
use parking_lot::Mutex;

use super::{page_align, SimPhysMemory};
use crate::cpu::{CpuId, CpuSet};
use crate::hal::{HypervisorPort, Mapping};

/// Cell registered with the simulated hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCell {
    /// Declared name.
    pub name: String,
    /// Cores handed to the cell.
    pub cpus: CpuSet,
    /// Cell RAM.
    pub ram: MemoryDesc,
    /// Descriptor bytes as read from physical memory.
    pub config: Vec<u8>,
}

#[derive(Default)]
struct HvState {
    active: CpuSet,
    entry_failures: BTreeMap<CpuId, i32>,
    disable_failures: BTreeMap<CpuId, i32>,
    cell_rejection: Option<i32>,
    cells: Vec<SimCell>,
    header: Option<HypervisorHeader>,
    system: Option<SystemConfigHeader>,
}

/// Simulated hypervisor.
///
/// Entry and exit are all-or-nothing: while any failure is injected for a
/// transition, no core changes mode and only the injected cores report an
/// error. Leaving on a core that is not under the hypervisor succeeds.
pub struct SimHypervisor {
    memory: Arc<SimPhysMemory>,
    state: Mutex<HvState>,
}

impl SimHypervisor {
    /// Hypervisor reading descriptors from `memory`.
    pub fn new(memory: Arc<SimPhysMemory>) -> Self {
        Self { memory, state: Mutex::new(HvState::default()) }
    }

    /// Makes entry on `cpu` fail with `code` until cleared.
    pub fn fail_entry(&self, cpu: CpuId, code: i32) {
        self.state.lock().entry_failures.insert(cpu, code);
    }

    /// Makes the disable hypercall on `cpu` fail with `code` until cleared.
    pub fn fail_disable(&self, cpu: CpuId, code: i32) {
        self.state.lock().disable_failures.insert(cpu, code);
    }

    /// Makes cell creation fail with `code`, or succeed again with `None`.
    pub fn reject_cells(&self, code: Option<i32>) {
        self.state.lock().cell_rejection = code;
    }

    /// Drops all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.entry_failures.clear();
        state.disable_failures.clear();
        state.cell_rejection = None;
    }

    /// Cores currently running under the hypervisor.
    pub fn active_cpus(&self) -> CpuSet {
        self.state.lock().active.clone()
    }

    /// Cells created since the hypervisor was last entered.
    pub fn cells(&self) -> Vec<SimCell> {
        self.state.lock().cells.clone()
    }

    /// Patched image header seen at the last successful entry.
    pub fn header(&self) -> Option<HypervisorHeader> {
        self.state.lock().header
    }

    /// System configuration header seen at the last successful entry.
    pub fn system_config(&self) -> Option<SystemConfigHeader> {
        self.state.lock().system
    }

    fn check_image(image: &dyn Mapping, entry: u64) -> Result<(HypervisorHeader, SystemConfigHeader), i32> {
        let mut raw = [0u8; HypervisorHeader::SIZE];
        image.read(0, &mut raw).map_err(|_| -errno::EINVAL)?;
        let header = HypervisorHeader::read_from(&raw).map_err(|_| -errno::EINVAL)?;
        let consistent = header.signature_valid()
            && header.size == image.len()
            && header.page_offset == image.virt_start().wrapping_sub(image.phys_start())
            && header.possible_cpus > 0
            && header.online_cpus > 0
            && header.online_cpus <= header.possible_cpus
            && entry < header.core_size;
        if !consistent {
            return Err(-errno::EINVAL);
        }

        let config_offset = page_align(header.core_size) + u64::from(header.possible_cpus) * header.percpu_size;
        let mut raw = [0u8; SystemConfigHeader::SIZE];
        image.read(config_offset, &mut raw).map_err(|_| -errno::EINVAL)?;
        let system = SystemConfigHeader::read_from(&raw).map_err(|_| -errno::EINVAL)?;
        let mem = system.hypervisor_memory;
        if mem.phys_start != image.phys_start() || mem.size != image.len() {
            return Err(-errno::EINVAL);
        }
        Ok((header, system))
    }

    fn create_cell(&self, state: &mut HvState, phys: u64) -> i32 {
        let mut raw = vec![0u8; CellDesc::SIZE];
        self.memory.read(phys, &mut raw);
        let Ok(size) = CellDesc::read_from(&raw).and_then(|desc| desc.config_size()) else {
            return -errno::EINVAL;
        };
        raw.resize(size, 0);
        self.memory.read(phys, &mut raw);
        let Ok(config) = CellConfig::parse(&raw) else {
            return -errno::EINVAL;
        };
        let Ok(cpus) = CpuSet::from_bitmap(config.cpus()) else {
            return -errno::EINVAL;
        };
        let Some(ram) = config.memory_region(0) else {
            return -errno::EINVAL;
        };
        if cpus.is_empty() || cpus.contains(CpuId::BOOT) {
            return -errno::EINVAL;
        }
        let name = String::from_utf8_lossy(config.desc().name_bytes()).into_owned();
        if state.cells.iter().any(|cell| cell.name == name || cell.cpus.iter().any(|c| cpus.contains(c))) {
            return -errno::EBUSY;
        }
        // The cell's cores leave the root cell for good.
        for cpu in &cpus {
            state.active.remove(cpu);
        }
        state.cells.push(SimCell { name, cpus, ram, config: raw });
        0
    }
}

impl HypervisorPort for SimHypervisor {
    fn enter(&self, image: &dyn Mapping, entry: u64, cpu: CpuId) -> i32 {
        let checked = Self::check_image(image, entry);
        let mut state = self.state.lock();
        if let Some(code) = state.entry_failures.get(&cpu) {
            return *code;
        }
        if !state.entry_failures.is_empty() {
            return 0;
        }
        match checked {
            Ok((header, system)) => {
                state.active.insert(cpu);
                state.header = Some(header);
                state.system = Some(system);
                0
            }
            Err(code) => code,
        }
    }

    fn hypercall(&self, cpu: CpuId, code: u32, arg: u64) -> i32 {
        let mut state = self.state.lock();
        match code {
            hypercall::DISABLE => {
                if let Some(code) = state.disable_failures.get(&cpu) {
                    return *code;
                }
                if !state.disable_failures.is_empty() {
                    return 0;
                }
                state.active.remove(cpu);
                if state.active.is_empty() {
                    state.cells.clear();
                }
                0
            }
            hypercall::CELL_CREATE => {
                if !state.active.contains(cpu) {
                    return -errno::EPERM;
                }
                if let Some(code) = state.cell_rejection {
                    return code;
                }
                self.create_cell(&mut state, arg)
            }
            _ => -errno::ENOSYS,
        }
    }
}
