// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: nexus-hv end-to-end harness
//! INTENT: Drive the loader control surface with compiled configurations on the simulated machine
//! DEPS: hypervisor-loader (host backend), nexus-hv-config
//! READINESS: Host backend ready
//! TESTS: tests/minimal_cell.rs

#![forbid(unsafe_code)]

use hypervisor_loader::host::{build_image, HostCaller, SimMachine};
use hypervisor_loader::{ControlSurface, DriverConfig, Loader};
use nexus_hv_abi::{op, NewCellRequest, PreloadImage};

/// Firmware name used by [`Harness`].
pub const FIRMWARE: &str = "nexus-hv-e2e.bin";

/// Loader configuration as an operator would ship it.
pub const DRIVER_CONFIG: &str = r#"
firmware_name = "nexus-hv-e2e.bin"
min_cell_memory = 0x100000
lock_poll_ms = 1
"#;

/// Simulated machine, a loader bound to it and one caller process.
pub struct Harness {
    /// The machine.
    pub machine: SimMachine,
    /// The loader under test.
    pub loader: Loader,
    /// Caller issuing control requests.
    pub caller: HostCaller,
}

impl Harness {
    /// Four-core machine with a hypervisor image installed.
    pub fn new() -> Self {
        let machine = SimMachine::new(4);
        machine.firmware.install(FIRMWARE, build_image(0x10_0000, 0x1000, 0x40, 0x3000));
        let config = DriverConfig::from_toml_str(DRIVER_CONFIG).expect("driver config");
        let loader = Loader::new(machine.platform(), config);
        Self { machine, loader, caller: HostCaller::new() }
    }

    /// Issues ENABLE with a compiled system configuration.
    pub fn enable(&self, system: &[u8]) -> i64 {
        let arg = self.caller.place(system);
        self.loader.ioctl(&self.caller, op::ENABLE, arg)
    }

    /// Issues DISABLE.
    pub fn disable(&self) -> i64 {
        self.loader.ioctl(&self.caller, op::DISABLE, 0)
    }

    /// Issues CELL_CREATE with a compiled cell and one preload image at `target`.
    pub fn create_cell(&self, cell: &[u8], image: &[u8], target: u64) -> i64 {
        let config_address = self.caller.place(cell);
        let source_address = self.caller.place(image);
        let config_size = u32::try_from(cell.len()).expect("cell size");
        let request = NewCellRequest { config_address, config_size, num_preload_images: 1 };
        let preload = PreloadImage { source_address, size: image.len() as u64, target_address: target, padding: 0 };
        let mut arg = request.to_le_bytes().to_vec();
        arg.extend_from_slice(&preload.to_le_bytes());
        let arg = self.caller.place(&arg);
        self.loader.ioctl(&self.caller, op::CELL_CREATE, arg)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
