// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cross-core rendezvous used to flip every online core into or out of the
//! hypervisor.
//!
//! INVARIANTS:
//!   - No core returns from its transition before every participating core
//!     has run it
//!   - The initiator observes completion only after every core finished
//!   - The initiating core runs with preemption disabled throughout

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use log::warn;
use nexus_hv_abi::errno;

use crate::cpu::CpuId;
use crate::hal::{CpuControl, PreemptGuard};

// Slot value of a core whose transition has not reported yet.
const NOT_RUN: i32 = -errno::EIO;

/// Result of one core's transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreOutcome {
    /// The core came back from the transition successfully.
    Resumed,
    /// The transition failed with this code.
    Failed(i32),
}

impl CoreOutcome {
    /// Interprets a raw transition return code.
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            CoreOutcome::Resumed
        } else {
            CoreOutcome::Failed(code)
        }
    }

    /// Raw code, 0 on success.
    pub fn code(self) -> i32 {
        match self {
            CoreOutcome::Resumed => 0,
            CoreOutcome::Failed(code) => code,
        }
    }
}

/// Per-core outcomes of one rendezvous, ordered by core id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// Outcome per participating core.
    pub per_core: Vec<(CpuId, CoreOutcome)>,
}

impl TransitionOutcome {
    /// Success iff every core resumed; otherwise the first failure in core-id order.
    pub fn aggregate(&self) -> core::result::Result<(), i32> {
        match self.per_core.iter().find_map(|(_, outcome)| match outcome {
            CoreOutcome::Failed(code) => Some(*code),
            CoreOutcome::Resumed => None,
        }) {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    /// Cores that reported a failure.
    pub fn failed_cpus(&self) -> impl Iterator<Item = CpuId> + '_ {
        self.per_core
            .iter()
            .filter(|(_, outcome)| matches!(outcome, CoreOutcome::Failed(_)))
            .map(|(cpu, _)| *cpu)
    }
}

/// Rendezvous over the cores of one [`CpuControl`].
pub struct Rendezvous<'a> {
    cpus: &'a dyn CpuControl,
    stall_warn_spins: u64,
}

impl<'a> Rendezvous<'a> {
    /// Creates a rendezvous that warns once after `stall_warn_spins` idle spins.
    pub fn new(cpus: &'a dyn CpuControl, stall_warn_spins: u64) -> Self {
        Self { cpus, stall_warn_spins }
    }

    /// Runs `transition` on every online core and waits for all of them.
    ///
    /// There is no timeout: a core that never runs its transition blocks the
    /// caller forever.
    pub fn run(&self, label: &str, transition: &(dyn Fn(CpuId) -> i32 + Sync)) -> TransitionOutcome {
        let _preempt = PreemptGuard::new(self.cpus);

        let online = self.cpus.online_cpus();
        let expected = online.len();
        let slots: Vec<AtomicI32> =
            (0..self.cpus.possible_cpus()).map(|_| AtomicI32::new(NOT_RUN)).collect();
        let invoked = AtomicUsize::new(0);
        let done = AtomicUsize::new(0);
        let warned = AtomicBool::new(false);

        self.cpus.on_each_cpu(&|cpu| {
            invoked.fetch_add(1, Ordering::AcqRel);
            let code = transition(cpu);
            if let Some(slot) = slots.get(cpu.as_index()) {
                slot.store(code, Ordering::Release);
            }
            done.fetch_add(1, Ordering::AcqRel);
            // Hold every core here until all of them have been through.
            self.spin_until(&invoked, expected, label, &warned);
        });
        self.spin_until(&done, expected, label, &warned);

        let per_core = online
            .iter()
            .map(|cpu| {
                let code = slots.get(cpu.as_index()).map_or(NOT_RUN, |slot| slot.load(Ordering::Acquire));
                (cpu, CoreOutcome::from_code(code))
            })
            .collect();
        TransitionOutcome { per_core }
    }

    fn spin_until(&self, counter: &AtomicUsize, expected: usize, label: &str, warned: &AtomicBool) {
        let mut spins = 0u64;
        while counter.load(Ordering::Acquire) < expected {
            spins = spins.saturating_add(1);
            if spins == self.stall_warn_spins && !warned.swap(true, Ordering::AcqRel) {
                warn!(
                    "nexus-hv: {label} rendezvous stalled: {}/{expected} cores",
                    counter.load(Ordering::Acquire)
                );
            }
            core::hint::spin_loop();
        }
    }
}
