// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deactivation: leave the hypervisor on every core and release its memory.

use log::{info, warn};
use nexus_hv_abi::hypercall;

use crate::barrier::Rendezvous;
use crate::error::{HvError, Result};
use crate::hal::CallerContext;
use crate::state::{ActivationState, LoaderState};
use crate::Loader;

impl Loader {
    /// Leaves the hypervisor on every online core.
    ///
    /// A failed rendezvous leaves the system enabled with its memory mapped;
    /// the operator may retry.
    pub fn disable(&self, caller: &dyn CallerContext) -> Result<()> {
        let mut state = self.state.lock_interruptible(caller)?;
        let result = self.disable_locked(&mut state);
        self.publish(&state);
        result
    }

    fn disable_locked(&self, state: &mut LoaderState) -> Result<()> {
        if state.activation() != ActivationState::Enabled {
            return Err(HvError::NotEnabled);
        }

        state.set_activation(ActivationState::Disabling);
        let hypervisor = &*self.platform.hypervisor;
        let outcome = Rendezvous::new(&*self.platform.cpus, self.config.barrier_stall_warn_spins)
            .run("disable", &|cpu| hypervisor.hypercall(cpu, hypercall::DISABLE, 0));

        if let Err(code) = outcome.aggregate() {
            warn!("nexus-hv: disable failed ({code}), hypervisor stays enabled");
            state.set_activation(ActivationState::Enabled);
            return Err(HvError::BarrierFailed { code });
        }

        // Dropping the region unmaps the hypervisor memory.
        state.hypervisor_mem = None;

        for cpu in &state.offlined.take() {
            if let Err(code) = self.platform.cpus.cpu_up(cpu) {
                warn!("nexus-hv: failed to bring cpu {cpu} back online ({code})");
            }
        }
        state.cells.clear();
        state.set_activation(ActivationState::Disabled);
        self.platform.module.put();
        info!("nexus-hv: the hypervisor was closed");
        Ok(())
    }
}
