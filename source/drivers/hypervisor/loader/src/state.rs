// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! System-wide loader state, owned by the coordination lock holder.

use std::fmt;

use crate::cpu::CpuSet;
use crate::region::MappedRegion;

/// Whether the hypervisor is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ActivationState {
    /// Not loaded.
    #[default]
    Disabled,
    /// Enable rendezvous in progress.
    Enabling,
    /// Every online core runs under the hypervisor.
    Enabled,
    /// Disable rendezvous in progress.
    Disabling,
}

impl ActivationState {
    /// Returns whether moving from `self` to `next` is a legal transition.
    pub fn can_transition(self, next: ActivationState) -> bool {
        use ActivationState::*;
        matches!(
            (self, next),
            (Disabled, Enabling)
                | (Enabling, Enabled)
                | (Enabling, Disabled)
                | (Enabled, Disabling)
                | (Disabling, Disabled)
                | (Disabling, Enabled)
        )
    }

    /// Returns whether the state is only held during a rendezvous.
    pub fn is_transient(self) -> bool {
        matches!(self, ActivationState::Enabling | ActivationState::Disabling)
    }
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivationState::Disabled => "disabled",
            ActivationState::Enabling => "enabling",
            ActivationState::Enabled => "enabled",
            ActivationState::Disabling => "disabling",
        };
        f.write_str(name)
    }
}

/// Externally visible snapshot of the loader state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    /// Committed activation state.
    pub state: ActivationState,
    /// Cores taken offline for cells.
    pub offlined: CpuSet,
    /// Names of cells created since the last enable.
    pub cells: Vec<String>,
}

#[derive(Default)]
pub(crate) struct LoaderState {
    activation: ActivationState,
    pub(crate) hypervisor_mem: Option<MappedRegion>,
    pub(crate) offlined: CpuSet,
    pub(crate) cells: Vec<String>,
}

impl LoaderState {
    pub(crate) fn activation(&self) -> ActivationState {
        self.activation
    }

    pub(crate) fn set_activation(&mut self, next: ActivationState) {
        debug_assert!(
            self.activation.can_transition(next),
            "illegal transition {} -> {next}",
            self.activation
        );
        self.activation = next;
    }

    pub(crate) fn snapshot(&self) -> Status {
        Status { state: self.activation, offlined: self.offlined.clone(), cells: self.cells.clone() }
    }
}
