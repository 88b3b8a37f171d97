// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Decoding compiled configurations back into a readable summary.

use core::fmt;

use nexus_hv_abi::{CellConfig, MemoryDesc, SystemConfigHeader};

use crate::{Error, Result};

/// Decoded view of a cell descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellSummary {
    /// Cell name, lossily decoded.
    pub name: String,
    /// Core ids in the cpu set.
    pub cpus: Vec<usize>,
    /// Memory regions in declaration order.
    pub memory: Vec<MemoryDesc>,
    /// Interrupt lines.
    pub irq_lines: Vec<u64>,
    /// Ports left accessible by the bitmap; `None` when the cell has no bitmap.
    pub allowed_ports: Option<usize>,
    /// PCI device slots.
    pub pci_devices: Vec<u64>,
    /// Encoded size in bytes.
    pub size: usize,
}

impl CellSummary {
    fn decode(bytes: &[u8]) -> Result<Self> {
        let config = CellConfig::parse(bytes).map_err(|err| Error::invalid("cell", err.to_string()))?;
        let pio = config.pio_bitmap();
        Ok(Self {
            name: String::from_utf8_lossy(config.desc().name_bytes()).into_owned(),
            cpus: config.cpus().iter().collect(),
            memory: config.memory_regions().collect(),
            irq_lines: config.irq_lines().collect(),
            allowed_ports: (!pio.is_empty()).then(|| pio.iter().map(|b| b.count_zeros() as usize).sum()),
            pci_devices: config.pci_devices().collect(),
            size: config.as_bytes().len(),
        })
    }
}

/// What a compiled file turned out to be.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Descriptor {
    /// A bare cell descriptor.
    Cell(CellSummary),
    /// A system configuration wrapping the root cell.
    System {
        /// The hypervisor reservation.
        hypervisor_memory: MemoryDesc,
        /// The root cell.
        root_cell: CellSummary,
    },
}

/// Decodes `bytes` as a system configuration if its header accounts for the
/// whole input, else as a cell descriptor of exactly that size.
pub fn inspect(bytes: &[u8]) -> Result<Descriptor> {
    if let Ok(header) = SystemConfigHeader::read_from(bytes) {
        if header.config_size as usize == bytes.len() && header.reserved == 0 {
            if let Ok(root_cell) = CellSummary::decode(&bytes[SystemConfigHeader::SIZE..]) {
                if root_cell.size == header.blob_size().unwrap_or(0) {
                    return Ok(Descriptor::System { hypervisor_memory: header.hypervisor_memory, root_cell });
                }
            }
        }
    }
    let cell = CellSummary::decode(bytes)?;
    if cell.size != bytes.len() {
        return Err(Error::invalid("cell", format!("{} trailing bytes", bytes.len() - cell.size)));
    }
    Ok(Descriptor::Cell(cell))
}

fn write_cell(f: &mut fmt::Formatter<'_>, cell: &CellSummary) -> fmt::Result {
    writeln!(f, "cell \"{}\" ({} bytes)", cell.name, cell.size)?;
    let cpus = cell.cpus.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
    writeln!(f, "  cpus: {{{cpus}}}")?;
    for (i, region) in cell.memory.iter().enumerate() {
        writeln!(
            f,
            "  memory[{i}]: phys {:#x} virt {:#x} size {:#x} flags {:?}",
            region.phys_start,
            region.virt_start,
            region.size,
            region.access()
        )?;
    }
    if !cell.irq_lines.is_empty() {
        writeln!(f, "  irq lines: {:?}", cell.irq_lines)?;
    }
    match cell.allowed_ports {
        Some(ports) => writeln!(f, "  pio: {ports} ports allowed")?,
        None => writeln!(f, "  pio: no bitmap")?,
    }
    if !cell.pci_devices.is_empty() {
        writeln!(f, "  pci devices: {:x?}", cell.pci_devices)?;
    }
    Ok(())
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Cell(cell) => write_cell(f, cell),
            Descriptor::System { hypervisor_memory, root_cell } => {
                writeln!(
                    f,
                    "system: hypervisor memory phys {:#x} size {:#x}",
                    hypervisor_memory.phys_start, hypervisor_memory.size
                )?;
                write_cell(f, root_cell)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compile_cell_str, compile_system_str, EXAMPLE_SYSTEM, MINIMAL_CELL};

    #[test]
    fn tells_cells_from_systems() {
        let cell = compile_cell_str(MINIMAL_CELL).unwrap();
        assert!(matches!(inspect(&cell), Ok(Descriptor::Cell(summary)) if summary.name == "Minimal"));

        let system = compile_system_str(EXAMPLE_SYSTEM).unwrap();
        match inspect(&system).unwrap() {
            Descriptor::System { hypervisor_memory, root_cell } => {
                assert_eq!(hypervisor_memory.size, 0x60_0000);
                assert_eq!(root_cell.allowed_ports, Some(0x10000));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_and_padded_input_is_rejected() {
        let mut cell = compile_cell_str(MINIMAL_CELL).unwrap();
        assert!(inspect(&cell[..cell.len() - 1]).is_err());
        cell.push(0);
        assert!(inspect(&cell).is_err());
    }

    #[test]
    fn summary_prints_the_cpu_set() {
        let cell = compile_cell_str(MINIMAL_CELL).unwrap();
        let text = inspect(&cell).unwrap().to_string();
        assert!(text.contains("cell \"Minimal\" (8284 bytes)"));
        assert!(text.contains("cpus: {3}"));
        assert!(text.contains("memory[0]: phys 0x3bf00000 virt 0x0 size 0x100000"));
    }
}
