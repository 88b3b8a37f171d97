// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! System files: the hypervisor's reserved memory plus the root cell.

use nexus_hv_abi::{MemFlags, MemoryDesc, SystemConfigHeader};
use serde::{Deserialize, Serialize};

use crate::cell::{CellFile, REGION_ALIGN};
use crate::{Error, Result};

/// `[hypervisor_memory]` section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HypervisorMemory {
    /// Physical base of the reservation.
    pub phys_start: u64,
    /// Length of the reservation.
    pub size: u64,
}

/// A parsed system file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemFile {
    /// Memory the loader maps for the hypervisor image.
    pub hypervisor_memory: HypervisorMemory,
    /// Cell that keeps running the host kernel.
    pub root_cell: CellFile,
}

impl SystemFile {
    /// Parses a system file.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Compiles the file into a system configuration header followed by the root cell.
    pub fn compile(&self) -> Result<Vec<u8>> {
        let HypervisorMemory { phys_start, size } = self.hypervisor_memory;
        if size == 0 || phys_start % REGION_ALIGN != 0 || size % REGION_ALIGN != 0 {
            return Err(Error::invalid("hypervisor_memory", "must be non-empty and 4 KiB aligned"));
        }
        if phys_start.checked_add(size).is_none() {
            return Err(Error::invalid("hypervisor_memory", "region wraps the address space"));
        }
        let blob = self.root_cell.compile().map_err(|err| match err {
            Error::Invalid { field, reason } => Error::Invalid { field: format!("root_cell.{field}"), reason },
            other => other,
        })?;
        let memory = MemoryDesc::new(phys_start, 0, size, MemFlags::READ | MemFlags::WRITE | MemFlags::EXECUTE);
        let header = SystemConfigHeader::new(memory, blob.len())
            .map_err(|_| Error::invalid("root_cell", "configuration exceeds 4 GiB"))?;

        let mut out = header.to_le_bytes().to_vec();
        out.extend_from_slice(&blob);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use nexus_hv_abi::CellConfig;

    use super::*;
    use crate::EXAMPLE_SYSTEM;

    #[test]
    fn header_covers_the_root_cell() {
        let bytes = SystemFile::from_toml_str(EXAMPLE_SYSTEM).unwrap().compile().unwrap();
        let header = SystemConfigHeader::read_from(&bytes).unwrap();
        assert_eq!(header.config_size as usize, bytes.len());
        assert_eq!(header.hypervisor_memory.phys_start, 0x3c00_0000);
        assert_eq!(header.hypervisor_memory.size, 0x60_0000);

        let root = CellConfig::parse(&bytes[SystemConfigHeader::SIZE..]).unwrap();
        assert_eq!(root.desc().name(), Some("RootCell"));
        assert_eq!(root.cpus().iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(root.memory_regions().count(), 2);
        assert!(root.pio_bitmap().iter().all(|b| *b == 0));
    }

    #[test]
    fn root_cell_errors_are_qualified() {
        let mut system = SystemFile::from_toml_str(EXAMPLE_SYSTEM).unwrap();
        system.root_cell.cpus.clear();
        match system.compile() {
            Err(Error::Invalid { field, .. }) => assert_eq!(field, "root_cell.cpus"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn misaligned_reservation_is_rejected() {
        let mut system = SystemFile::from_toml_str(EXAMPLE_SYSTEM).unwrap();
        system.hypervisor_memory.size = 0x1234;
        assert!(matches!(system.compile(), Err(Error::Invalid { .. })));
    }
}
