// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cell files.
//!
//! ```toml
//! name = "Minimal"
//! cpus = [3]
//!
//! [[memory]]
//! phys_start = 0x3bf00000
//! virt_start = 0
//! size = 0x100000
//! flags = ["read", "write", "execute"]
//!
//! [pio]
//! allow = [[0x3f8, 0x3ff]]
//! ```

use nexus_hv_abi::cell::{IRQ_SLOT_SIZE, NAME_LEN, PCI_SLOT_SIZE};
use nexus_hv_abi::{CellDesc, MemFlags, MemoryDesc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Bytes in a port-I/O bitmap covering the full 16-bit port space.
pub const PIO_BITMAP_SIZE: usize = 0x2000;
/// Granularity that region bases and sizes must respect.
pub const REGION_ALIGN: u64 = 0x1000;
/// Highest core id a cell file may name.
pub const MAX_CPU: u16 = 4095;

/// Access right granted on a memory region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessFlag {
    /// Readable.
    Read,
    /// Writable.
    Write,
    /// Executable.
    Execute,
    /// Reachable by DMA.
    Dma,
}

impl AccessFlag {
    fn bits(self) -> MemFlags {
        match self {
            AccessFlag::Read => MemFlags::READ,
            AccessFlag::Write => MemFlags::WRITE,
            AccessFlag::Execute => MemFlags::EXECUTE,
            AccessFlag::Dma => MemFlags::DMA,
        }
    }
}

/// One `[[memory]]` entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryEntry {
    /// Host physical base.
    pub phys_start: u64,
    /// Base as seen from inside the cell.
    pub virt_start: u64,
    /// Length in bytes.
    pub size: u64,
    /// Access rights.
    #[serde(default)]
    pub flags: Vec<AccessFlag>,
}

impl MemoryEntry {
    fn to_desc(&self, index: usize) -> Result<MemoryDesc> {
        let field = || format!("memory[{index}]");
        if self.size == 0 {
            return Err(Error::invalid(field(), "size must be non-zero"));
        }
        let aligned = [self.phys_start, self.virt_start, self.size].iter().all(|v| v % REGION_ALIGN == 0);
        if !aligned {
            return Err(Error::invalid(field(), "start and size must be 4 KiB aligned"));
        }
        if self.phys_start.checked_add(self.size).is_none() || self.virt_start.checked_add(self.size).is_none() {
            return Err(Error::invalid(field(), "region wraps the address space"));
        }
        let flags = self.flags.iter().fold(MemFlags::empty(), |acc, flag| acc | flag.bits());
        Ok(MemoryDesc::new(self.phys_start, self.virt_start, self.size, flags))
    }
}

/// Port-I/O section.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PioSection {
    /// Inclusive `[first, last]` port ranges the cell may access.
    #[serde(default)]
    pub allow: Vec<[u32; 2]>,
}

impl PioSection {
    /// Builds the bitmap: every port denied (bit set) unless an allow range covers it.
    pub fn bitmap(&self) -> Result<Vec<u8>> {
        let mut bitmap = vec![0xffu8; PIO_BITMAP_SIZE];
        for (index, [first, last]) in self.allow.iter().copied().enumerate() {
            if first > last || last > u32::from(u16::MAX) {
                return Err(Error::invalid(format!("pio.allow[{index}]"), "expected [first, last] within 0..=0xffff"));
            }
            for port in first as usize..=last as usize {
                bitmap[port / 8] &= !(1 << (port % 8));
            }
        }
        Ok(bitmap)
    }
}

/// A parsed cell file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CellFile {
    /// Cell name, at most 31 bytes.
    pub name: String,
    /// Core ids handed to the cell.
    pub cpus: Vec<u16>,
    /// Memory regions; the first is the cell's RAM.
    #[serde(default)]
    pub memory: Vec<MemoryEntry>,
    /// Interrupt lines routed to the cell.
    #[serde(default)]
    pub irq_lines: Vec<u32>,
    /// Port-I/O permissions; without this section the cell carries no bitmap.
    #[serde(default)]
    pub pio: Option<PioSection>,
    /// PCI devices by bus/device/function number.
    #[serde(default)]
    pub pci_devices: Vec<u16>,
}

impl CellFile {
    /// Parses a cell file.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn cpu_bitmap(&self) -> Result<Vec<u8>> {
        if self.cpus.is_empty() {
            return Err(Error::invalid("cpus", "at least one core is required"));
        }
        let highest = self.cpus.iter().copied().max().unwrap_or(0);
        if highest > MAX_CPU {
            return Err(Error::invalid("cpus", format!("core {highest} exceeds {MAX_CPU}")));
        }
        // Whole 64-bit words, as the hypervisor reads the set.
        let words = usize::from(highest) / 64 + 1;
        let mut bitmap = vec![0u8; words * 8];
        for cpu in self.cpus.iter().map(|c| usize::from(*c)) {
            bitmap[cpu / 8] |= 1 << (cpu % 8);
        }
        Ok(bitmap)
    }

    fn count(field: &str, len: usize) -> Result<u32> {
        u32::try_from(len).map_err(|_| Error::invalid(field, "too many entries"))
    }

    /// Compiles the file into a cell descriptor followed by its sections.
    pub fn compile(&self) -> Result<Vec<u8>> {
        let mut desc = CellDesc::default();
        if self.name.is_empty() {
            return Err(Error::invalid("name", "must not be empty"));
        }
        desc.set_name(&self.name)
            .map_err(|_| Error::invalid("name", format!("must be shorter than {NAME_LEN} bytes without NUL")))?;
        if self.memory.is_empty() {
            return Err(Error::invalid("memory", "the first region is the cell's RAM and is required"));
        }

        let cpus = self.cpu_bitmap()?;
        let regions = self.memory.iter().enumerate().map(|(i, m)| m.to_desc(i)).collect::<Result<Vec<_>>>()?;
        let pio = self.pio.as_ref().map(PioSection::bitmap).transpose()?.unwrap_or_default();

        desc.cpu_set_size = Self::count("cpus", cpus.len())?;
        desc.num_memory_regions = Self::count("memory", regions.len())?;
        desc.num_irq_lines = Self::count("irq_lines", self.irq_lines.len())?;
        desc.pio_bitmap_size = Self::count("pio", pio.len())?;
        desc.num_pci_devices = Self::count("pci_devices", self.pci_devices.len())?;
        let size = desc.config_size().map_err(|_| Error::invalid("cell", "descriptor size overflows"))?;

        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&desc.to_le_bytes());
        out.extend_from_slice(&cpus);
        for region in &regions {
            out.extend_from_slice(&region.to_le_bytes());
        }
        for irq in &self.irq_lines {
            out.extend_from_slice(&u64::from(*irq).to_le_bytes()[..IRQ_SLOT_SIZE]);
        }
        out.extend_from_slice(&pio);
        for bdf in &self.pci_devices {
            out.extend_from_slice(&u64::from(*bdf).to_le_bytes()[..PCI_SLOT_SIZE]);
        }
        debug_assert_eq!(out.len(), size);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use nexus_hv_abi::CellConfig;
    use proptest::prelude::*;

    use super::*;

    fn cell(extra: &str) -> String {
        format!(
            "name = \"c\"\ncpus = [1]\n{extra}\n[[memory]]\nphys_start = 0x100000\nvirt_start = 0\nsize = 0x100000\nflags = [\"read\"]\n"
        )
    }

    #[test]
    fn cpu_bitmap_grows_in_words() {
        let text = "name = \"wide\"\ncpus = [1, 70]\n[[memory]]\nphys_start = 0\nvirt_start = 0\nsize = 0x1000\n";
        let bytes = CellFile::from_toml_str(text).unwrap().compile().unwrap();
        let config = CellConfig::parse(&bytes).unwrap();
        assert_eq!(config.desc().cpu_set_size, 16);
        assert_eq!(config.cpus().iter().collect::<Vec<_>>(), vec![1, 70]);
    }

    #[test]
    fn sections_are_laid_out_in_order() {
        let text = cell("irq_lines = [4, 9]\npci_devices = [0x00f8]");
        let bytes = CellFile::from_toml_str(&text).unwrap().compile().unwrap();
        let config = CellConfig::parse(&bytes).unwrap();
        assert_eq!(config.irq_lines().collect::<Vec<_>>(), vec![4, 9]);
        assert_eq!(config.pci_devices().collect::<Vec<_>>(), vec![0xf8]);
        assert!(config.pio_bitmap().is_empty());
        assert_eq!(config.memory_region(0).unwrap().access(), MemFlags::READ);
        assert_eq!(bytes.len(), CellDesc::SIZE + 8 + 32 + 16 + 8);
    }

    #[test]
    fn rejects_unrepresentable_fields() {
        let long = "x".repeat(NAME_LEN);
        let cases = [
            (format!("name = \"{long}\"\ncpus = [1]\n[[memory]]\nphys_start = 0\nvirt_start = 0\nsize = 0x1000\n"), "name"),
            ("name = \"c\"\ncpus = []\n[[memory]]\nphys_start = 0\nvirt_start = 0\nsize = 0x1000\n".to_string(), "cpus"),
            ("name = \"c\"\ncpus = [1]\n".to_string(), "memory"),
            ("name = \"c\"\ncpus = [1]\n[[memory]]\nphys_start = 0x10\nvirt_start = 0\nsize = 0x1000\n".to_string(), "memory[0]"),
            ("name = \"c\"\ncpus = [1]\n[[memory]]\nphys_start = 0\nvirt_start = 0\nsize = 0\n".to_string(), "memory[0]"),
        ];
        for (text, expected) in cases {
            match CellFile::from_toml_str(&text).unwrap().compile() {
                Err(Error::Invalid { field, .. }) => assert_eq!(field, expected),
                other => panic!("{expected}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn unknown_keys_and_flags_fail_to_parse() {
        assert!(matches!(CellFile::from_toml_str(&cell("colour = 1")), Err(Error::Parse(_))));
        let text = "name = \"c\"\ncpus = [1]\n[[memory]]\nphys_start = 0\nvirt_start = 0\nsize = 0x1000\nflags = [\"rwx\"]\n";
        assert!(matches!(CellFile::from_toml_str(text), Err(Error::Parse(_))));
    }

    #[test]
    fn inverted_pio_range_is_invalid() {
        let pio = PioSection { allow: vec![[0x10, 0x0f]] };
        assert!(matches!(pio.bitmap(), Err(Error::Invalid { .. })));
        let pio = PioSection { allow: vec![[0xfff0, 0x10000]] };
        assert!(pio.bitmap().is_err());
    }

    proptest! {
        #[test]
        fn allow_ranges_clear_exactly_their_ports(first in 0u32..0xffff, len in 0u32..64, probe in 0usize..0x10000) {
            let last = (first + len).min(0xffff);
            let bitmap = PioSection { allow: vec![[first, last]] }.bitmap().unwrap();
            let denied = bitmap[probe / 8] & (1 << (probe % 8)) != 0;
            let inside = (first as usize..=last as usize).contains(&probe);
            prop_assert_eq!(denied, !inside);
        }
    }
}
