// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Minimal cell lifecycle from TOML to the simulated hypervisor
//! TEST_SCOPE: nexus-hv-config output consumed by the loader control surface
//! TEST_SCENARIOS:
//!   - minimal_cell_lifecycle(): enable, create Minimal on core 3, disable
//!   - second_cell_on_same_core_is_refused(): the hypervisor reports the clash
//!   - oversized_system_config_is_rejected(): root cell larger than the reservation
//! ADR: docs/adr/0030-hypervisor-partitioning.md

use hv_e2e::Harness;
use hypervisor_loader::hal::CpuControl;
use hypervisor_loader::{ActivationState, CpuId};
use nexus_hv_abi::errno;
use nexus_hv_config::{compile_cell_str, compile_system_str, SystemFile, EXAMPLE_SYSTEM, MINIMAL_CELL};

const MINIMAL_RAM: u64 = 0x3bf0_0000;

fn kernel_image() -> Vec<u8> {
    (0..0x2000u32).map(|i| (i % 7) as u8 + 1).collect()
}

#[test]
fn minimal_cell_lifecycle() {
    let rig = Harness::new();
    let system = compile_system_str(EXAMPLE_SYSTEM).expect("system");
    assert_eq!(rig.enable(&system), 0);
    assert_eq!(rig.machine.hypervisor.active_cpus().len(), 4);
    let seen = rig.machine.hypervisor.system_config().expect("system config");
    assert_eq!(seen.hypervisor_memory.phys_start, 0x3c00_0000);
    assert_eq!(seen.config_size as usize, system.len());

    let cell = compile_cell_str(MINIMAL_CELL).expect("cell");
    let image = kernel_image();
    assert_eq!(rig.create_cell(&cell, &image, 0x1000), 0);

    let status = rig.loader.status();
    assert_eq!(status.cells, vec!["Minimal".to_string()]);
    assert!(status.offlined.contains(CpuId::from_raw(3)));
    assert!(!rig.machine.cpus.is_online(CpuId::from_raw(3)));

    let cells = rig.machine.hypervisor.cells();
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].name, "Minimal");
    assert_eq!(cells[0].config, cell);
    assert_eq!(cells[0].ram.phys_start, MINIMAL_RAM);

    let mut loaded = vec![0u8; image.len()];
    rig.machine.memory.read(MINIMAL_RAM + 0x1000, &mut loaded);
    assert_eq!(loaded, image);
    let mut head = [0xffu8; 16];
    rig.machine.memory.read(MINIMAL_RAM, &mut head);
    assert_eq!(head, [0u8; 16]);

    assert_eq!(rig.disable(), 0);
    let status = rig.loader.status();
    assert_eq!(status.state, ActivationState::Disabled);
    assert!(status.offlined.is_empty());
    assert!(rig.machine.cpus.is_online(CpuId::from_raw(3)));
    assert_eq!(rig.machine.mapper.active_mappings(), 0);
    assert_eq!(rig.machine.mapper.outstanding_buffers(), 0);
    assert_eq!(rig.machine.module.refs(), 0);
}

#[test]
fn second_cell_on_same_core_is_refused() {
    let rig = Harness::new();
    assert_eq!(rig.enable(&compile_system_str(EXAMPLE_SYSTEM).expect("system")), 0);
    let cell = compile_cell_str(MINIMAL_CELL).expect("cell");
    assert_eq!(rig.create_cell(&cell, &kernel_image(), 0), 0);

    let renamed = MINIMAL_CELL.replace("\"Minimal\"", "\"Minimal-2\"");
    let clash = compile_cell_str(&renamed).expect("cell");
    assert_eq!(rig.create_cell(&clash, &kernel_image(), 0), -i64::from(errno::EBUSY));
    assert_eq!(rig.loader.status().cells, vec!["Minimal".to_string()]);
    assert_eq!(rig.disable(), 0);
}

#[test]
fn oversized_system_config_is_rejected() {
    let rig = Harness::new();
    let mut system = SystemFile::from_toml_str(EXAMPLE_SYSTEM).expect("parse");
    system.hypervisor_memory.size = 0x10_1000;
    let bytes = system.compile().expect("compile");
    assert_eq!(rig.enable(&bytes), -i64::from(errno::EINVAL));
    assert_eq!(rig.loader.status().state, ActivationState::Disabled);
    assert_eq!(rig.machine.mapper.active_mappings(), 0);
    assert_eq!(rig.machine.firmware.outstanding(), 0);
}
