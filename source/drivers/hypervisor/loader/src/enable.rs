// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Activation: load the image into reserved memory and enter it on every core.

use log::{error, info};
use nexus_hv_abi::{HypervisorHeader, MemFlags, SystemConfigHeader};

use crate::barrier::Rendezvous;
use crate::error::{HvError, Result};
use crate::hal::{CallerContext, FirmwareGuard, ModuleGuard, PreemptGuard};
use crate::layout::{validate_image, ImageLayout};
use crate::region::{MappedRegion, MemoryRegion};
use crate::state::{ActivationState, LoaderState};
use crate::Loader;

impl Loader {
    /// Loads the hypervisor into `config.hypervisor_memory` and enters it on
    /// every online core.
    ///
    /// `source` is the caller address of the full system configuration
    /// (header plus trailing blob) that the header was copied from.
    pub fn enable(&self, caller: &dyn CallerContext, config: SystemConfigHeader, source: u64) -> Result<()> {
        if config.blob_size().is_none() {
            return Err(HvError::ArgumentInvalid);
        }
        let mut state = self.state.lock_interruptible(caller)?;
        let result = self.enable_locked(&mut state, caller, &config, source);
        self.publish(&state);
        result
    }

    fn enable_locked(
        &self,
        state: &mut LoaderState,
        caller: &dyn CallerContext,
        config: &SystemConfigHeader,
        source: u64,
    ) -> Result<()> {
        if state.activation() != ActivationState::Disabled {
            return Err(HvError::ResourceBusy);
        }
        let module = ModuleGuard::acquire(&*self.platform.module).ok_or(HvError::ResourceBusy)?;

        let firmware = FirmwareGuard::request(&*self.platform.firmware, &self.config.firmware_name)
            .ok_or(HvError::ImageUnavailable)?;
        let image = firmware.data();
        let header = validate_image(image)?;

        let cpus = &*self.platform.cpus;
        let possible = cpus.possible_cpus();
        let hv_mem = MemoryRegion::from_desc(&config.hypervisor_memory).map_err(|_| HvError::LayoutOverflow)?;
        let layout = ImageLayout::compute(
            &header,
            image.len() as u64,
            hv_mem.size,
            u64::from(config.config_size),
            possible,
            self.config.page_size,
        )?;

        let mapped =
            hv_mem.map(&self.platform.mapper, MemFlags::READ | MemFlags::WRITE | MemFlags::EXECUTE)?;
        mapped.write(0, image)?;
        mapped.fill(image.len() as u64, hv_mem.size - image.len() as u64, 0)?;
        write_u64(&mapped, HypervisorHeader::SIZE_OFFSET, hv_mem.size)?;
        write_u64(&mapped, HypervisorHeader::PAGE_OFFSET_OFFSET, mapped.page_offset())?;
        write_u32(&mapped, HypervisorHeader::POSSIBLE_CPUS_OFFSET, possible as u32)?;

        mapped.copy_from_caller(
            caller,
            layout.config_offset(),
            source,
            layout.config_size,
            HvError::ConfigTransferFailed,
        )?;
        // The caller may have rewritten its header since it was checked.
        mapped.write(layout.config_offset(), &config.to_le_bytes())?;

        let outcome = {
            let _preempt = PreemptGuard::new(cpus);
            let online = cpus.online_cpus().len();
            write_u32(&mapped, HypervisorHeader::ONLINE_CPUS_OFFSET, online as u32)?;

            state.set_activation(ActivationState::Enabling);
            let hypervisor = &*self.platform.hypervisor;
            let image_mem: &MappedRegion = &mapped;
            Rendezvous::new(cpus, self.config.barrier_stall_warn_spins)
                .run("enable", &|cpu| hypervisor.enter(&**image_mem, header.entry, cpu))
        };

        if let Err(code) = outcome.aggregate() {
            let failed: Vec<String> = outcome.failed_cpus().map(|cpu| cpu.to_string()).collect();
            error!("nexus-hv: enable failed on cpus [{}] ({code})", failed.join(","));
            state.set_activation(ActivationState::Disabled);
            return Err(HvError::BarrierFailed { code });
        }

        module.keep();
        state.hypervisor_mem = Some(mapped);
        state.cells.clear();
        state.set_activation(ActivationState::Enabled);
        drop(firmware);
        info!("nexus-hv: the hypervisor is opening");
        Ok(())
    }
}

fn write_u64(mapped: &MappedRegion, offset: usize, value: u64) -> Result<()> {
    mapped.write(offset as u64, &value.to_le_bytes())
}

fn write_u32(mapped: &MappedRegion, offset: usize, value: u32) -> Result<()> {
    mapped.write(offset as u64, &value.to_le_bytes())
}
