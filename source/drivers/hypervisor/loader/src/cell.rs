// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cell creation: quiesce the requested cores, load the preload image into
//! the cell's RAM and hand the descriptor to the hypervisor.

use log::{debug, info};
use nexus_hv_abi::{hypercall, CellConfig, CellDesc, MemFlags, MemoryDesc, NewCellRequest, PreloadImage};

use crate::cpu::CpuSet;
use crate::error::{HvError, Result};
use crate::hal::{CallerContext, PreemptGuard};
use crate::region::{MappedRegion, MemoryRegion};
use crate::state::{ActivationState, LoaderState};
use crate::Loader;

/// Image copied into cell RAM before creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadSpec {
    /// Caller address of the image.
    pub source: u64,
    /// Offset inside the cell RAM.
    pub target_offset: u64,
    /// Image length.
    pub size: u64,
}

impl From<&PreloadImage> for PreloadSpec {
    fn from(image: &PreloadImage) -> Self {
        Self { source: image.source_address, target_offset: image.target_address, size: image.size }
    }
}

/// What the loader needs to know about a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellSpec {
    /// Declared name.
    pub name: String,
    /// Cores the cell owns exclusively.
    pub cpu_mask: CpuSet,
    /// Cell RAM, the first memory region of the descriptor.
    pub memory: Option<MemoryDesc>,
    /// Preload image.
    pub preload: PreloadSpec,
}

impl CellSpec {
    /// Reads the cell name, cpus, RAM and preload placement from a parsed descriptor.
    pub fn from_descriptor(config: &CellConfig<'_>, image: &PreloadImage) -> Result<Self> {
        Ok(Self {
            name: String::from_utf8_lossy(config.desc().name_bytes()).into_owned(),
            cpu_mask: CpuSet::from_bitmap(config.cpus())?,
            memory: config.memory_region(0),
            preload: PreloadSpec::from(image),
        })
    }

    /// Checks that the cell RAM exists, is at least `min_size` bytes and can
    /// hold the preload image.
    pub fn validate_memory(&self, min_size: u64) -> Result<MemoryRegion> {
        let ram = self.memory.ok_or(HvError::InvalidCellMemory)?;
        if ram.size < min_size {
            return Err(HvError::InvalidCellMemory);
        }
        let end = self.preload.target_offset.checked_add(self.preload.size).ok_or(HvError::InvalidCellMemory)?;
        if end > ram.size {
            return Err(HvError::InvalidCellMemory);
        }
        MemoryRegion::from_desc(&ram).map_err(|_| HvError::InvalidCellMemory)
    }
}

impl Loader {
    /// Creates a cell from the descriptor at `request.config_address`.
    ///
    /// Cores taken offline before a later step fails stay offline and are
    /// recorded; they are brought back by the next successful disable.
    pub fn create_cell(
        &self,
        caller: &dyn CallerContext,
        request: &NewCellRequest,
        image: &PreloadImage,
    ) -> Result<String> {
        let mut state = self.state.lock_interruptible(caller)?;
        let result = self.create_cell_locked(&mut state, caller, request, image);
        self.publish(&state);
        result
    }

    fn create_cell_locked(
        &self,
        state: &mut LoaderState,
        caller: &dyn CallerContext,
        request: &NewCellRequest,
        image: &PreloadImage,
    ) -> Result<String> {
        let size = request.config_size as usize;
        if size < CellDesc::SIZE {
            return Err(HvError::ArgumentInvalid);
        }
        let descriptor = MappedRegion::alloc_contiguous(&self.platform.mapper, size as u64)?;
        descriptor.copy_from_caller(caller, 0, request.config_address, size as u64, HvError::TransferFault)?;
        let mut raw = vec![0u8; size];
        descriptor.read(0, &mut raw)?;
        CellDesc::terminate_name(&mut raw);
        descriptor.write(0, &raw[..CellDesc::SIZE])?;

        let config = CellConfig::parse(&raw).map_err(|_| HvError::ArgumentInvalid)?;
        let spec = CellSpec::from_descriptor(&config, image)?;

        let cpus = &*self.platform.cpus;
        for cpu in &spec.cpu_mask {
            if !cpus.is_online(cpu) {
                continue;
            }
            cpus.cpu_down(cpu).map_err(|code| HvError::CpuOfflineFailed { cpu, code })?;
            state.offlined.insert(cpu);
            debug!("nexus-hv: cpu {cpu} offlined for cell \"{}\"", spec.name);
        }

        let ram = spec.validate_memory(self.config.min_cell_memory)?;
        let cell_mem = ram.map(&self.platform.mapper, MemFlags::READ | MemFlags::WRITE)?;
        cell_mem.fill(0, ram.size, 0)?;
        cell_mem.copy_from_caller(
            caller,
            spec.preload.target_offset,
            spec.preload.source,
            spec.preload.size,
            HvError::PreloadCopyFailed,
        )?;

        if state.activation() != ActivationState::Enabled {
            return Err(HvError::NotEnabled);
        }

        let code = {
            let _preempt = PreemptGuard::new(cpus);
            self.platform.hypervisor.hypercall(
                cpus.current_cpu(),
                hypercall::CELL_CREATE,
                descriptor.region().physical_start,
            )
        };
        if code != 0 {
            return Err(HvError::HypervisorRejected { code });
        }

        info!("nexus-hv: created cell \"{}\"", spec.name);
        state.cells.push(spec.name.clone());
        Ok(spec.name)
    }
}
