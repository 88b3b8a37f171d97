// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shipped configuration fixtures compile to the expected descriptors
//! TEST_SCOPE: nexus-hv-config public API against the nexus-hv-abi decoders
//! TEST_SCENARIOS:
//!   - Minimal cell: size, cpu set, RAM region, port bitmap
//!   - Example system: header accounts for the root cell blob
//!   - Compiling is deterministic
//! ADR: docs/adr/0030-hypervisor-partitioning.md

use nexus_hv_abi::{CellConfig, CellDesc, MemFlags, MemoryDesc, SystemConfigHeader};
use nexus_hv_config::{compile_cell_str, compile_system_str, EXAMPLE_SYSTEM, MINIMAL_CELL};

fn port_allowed(bitmap: &[u8], port: usize) -> bool {
    bitmap[port / 8] & (1 << (port % 8)) == 0
}

#[test]
fn minimal_cell_matches_the_demo_layout() {
    let bytes = compile_cell_str(MINIMAL_CELL).expect("compile");
    assert_eq!(bytes.len(), CellDesc::SIZE + 8 + MemoryDesc::SIZE + 0x2000);
    assert_eq!(bytes.len(), 8284);

    let config = CellConfig::parse(&bytes).expect("parse");
    assert_eq!(config.desc().name(), Some("Minimal"));
    assert_eq!(config.cpus().iter().collect::<Vec<_>>(), vec![3]);

    let ram = config.memory_region(0).expect("ram");
    assert_eq!((ram.phys_start, ram.virt_start, ram.size), (0x3bf0_0000, 0, 0x10_0000));
    assert_eq!(ram.access(), MemFlags::READ | MemFlags::WRITE | MemFlags::EXECUTE);
    assert_eq!(config.irq_lines().count(), 0);
    assert_eq!(config.pci_devices().count(), 0);
}

#[test]
fn minimal_cell_ports_follow_the_allow_list() {
    let bytes = compile_cell_str(MINIMAL_CELL).expect("compile");
    let config = CellConfig::parse(&bytes).expect("parse");
    let bitmap = config.pio_bitmap();
    assert_eq!(bitmap.len(), 0x2000);

    // serial1
    assert_eq!(&bitmap[0x3f8 / 8..=0x3ff / 8], &[0x00]);
    // PM timer windows: low four ports of the byte open, high four closed.
    for base in [0x408usize, 0x1808, 0xb008] {
        assert_eq!(bitmap[base / 8], 0xf0, "port {base:#x}");
        assert!(port_allowed(bitmap, base + 3));
        assert!(!port_allowed(bitmap, base + 4));
    }
    // OXPCIe952 serial1
    assert_eq!(bitmap[0xe010 / 8], 0x00);

    let allowed: usize = bitmap.iter().map(|b| b.count_zeros() as usize).sum();
    assert_eq!(allowed, 8 + 3 * 4 + 8);
    assert!(!port_allowed(bitmap, 0x3f7));
    assert!(!port_allowed(bitmap, 0x400));
    assert!(!port_allowed(bitmap, 0xffff));
}

#[test]
fn example_system_wraps_its_root_cell() {
    let bytes = compile_system_str(EXAMPLE_SYSTEM).expect("compile");
    let header = SystemConfigHeader::read_from(&bytes).expect("header");
    assert_eq!(header.blob_size(), Some(bytes.len() - SystemConfigHeader::SIZE));
    assert_eq!(header.reserved, 0);

    let root = CellConfig::parse(&bytes[SystemConfigHeader::SIZE..]).expect("root cell");
    assert_eq!(root.as_bytes().len(), bytes.len() - SystemConfigHeader::SIZE);
    let dma: Vec<_> = root.memory_regions().filter(|r| r.access().contains(MemFlags::DMA)).collect();
    assert_eq!(dma.len(), 1);
    assert_eq!(dma[0].size, 0x3bf0_0000);
}

#[test]
fn compiling_is_deterministic() {
    assert_eq!(compile_cell_str(MINIMAL_CELL).expect("a"), compile_cell_str(MINIMAL_CELL).expect("b"));
    assert_eq!(compile_system_str(EXAMPLE_SYSTEM).expect("a"), compile_system_str(EXAMPLE_SYSTEM).expect("b"));
}
