// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cell descriptors and the create-cell request.
//!
//! A cell configuration is a [`CellDesc`] followed by its variable sections in
//! this order: cpu bitmap, memory regions, irq line slots, port-I/O bitmap and
//! PCI device slots. The first memory region is the cell's RAM.

use core::str;

use static_assertions::const_assert_eq;

use crate::memory::MemoryDesc;
use crate::{put_u32, put_u64, u32_at, u64_at, AbiError, Result};

/// Size of the fixed name field including its terminator.
pub const NAME_LEN: usize = 32;
/// Size of one irq line slot.
pub const IRQ_SLOT_SIZE: usize = 8;
/// Size of one PCI device slot.
pub const PCI_SLOT_SIZE: usize = 8;

/// Fixed header of a cell configuration.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellDesc {
    /// NUL-terminated cell name.
    pub name: [u8; NAME_LEN],
    /// Bytes in the cpu bitmap.
    pub cpu_set_size: u32,
    /// Number of [`MemoryDesc`] entries.
    pub num_memory_regions: u32,
    /// Number of irq line slots.
    pub num_irq_lines: u32,
    /// Bytes in the port-I/O bitmap.
    pub pio_bitmap_size: u32,
    /// Number of PCI device slots.
    pub num_pci_devices: u32,
}

const_assert_eq!(core::mem::size_of::<CellDesc>(), CellDesc::SIZE);

impl Default for CellDesc {
    fn default() -> Self {
        Self {
            name: [0; NAME_LEN],
            cpu_set_size: 0,
            num_memory_regions: 0,
            num_irq_lines: 0,
            pio_bitmap_size: 0,
            num_pci_devices: 0,
        }
    }
}

impl CellDesc {
    /// Encoded size in bytes.
    pub const SIZE: usize = 52;

    /// Stores `name`, leaving room for the terminator.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        let raw = name.as_bytes();
        if raw.len() >= NAME_LEN || raw.contains(&0) {
            return Err(AbiError::NameTooLong);
        }
        self.name = [0; NAME_LEN];
        self.name[..raw.len()].copy_from_slice(raw);
        Ok(())
    }

    /// Name bytes up to the first NUL. The last byte is never part of the name.
    pub fn name_bytes(&self) -> &[u8] {
        let field = &self.name[..NAME_LEN - 1];
        let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
        &field[..end]
    }

    /// Name as UTF-8, if it is valid UTF-8.
    pub fn name(&self) -> Option<&str> {
        str::from_utf8(self.name_bytes()).ok()
    }

    fn section_sizes(&self) -> Option<[usize; 5]> {
        let cpu = self.cpu_set_size as usize;
        let mem = (self.num_memory_regions as usize).checked_mul(MemoryDesc::SIZE)?;
        let irq = (self.num_irq_lines as usize).checked_mul(IRQ_SLOT_SIZE)?;
        let pio = self.pio_bitmap_size as usize;
        let pci = (self.num_pci_devices as usize).checked_mul(PCI_SLOT_SIZE)?;
        Some([cpu, mem, irq, pio, pci])
    }

    fn section_offset(&self, index: usize) -> Result<usize> {
        let sizes = self.section_sizes().ok_or(AbiError::SizeOverflow)?;
        sizes[..index]
            .iter()
            .try_fold(Self::SIZE, |acc, len| acc.checked_add(*len))
            .ok_or(AbiError::SizeOverflow)
    }

    /// Total size of the configuration including all trailing sections.
    pub fn config_size(&self) -> Result<usize> {
        self.section_offset(5)
    }

    /// Decodes the header from the start of `bytes`.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(AbiError::Truncated);
        }
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&bytes[..NAME_LEN]);
        Ok(Self {
            name,
            cpu_set_size: u32_at(bytes, 32),
            num_memory_regions: u32_at(bytes, 36),
            num_irq_lines: u32_at(bytes, 40),
            pio_bitmap_size: u32_at(bytes, 44),
            num_pci_devices: u32_at(bytes, 48),
        })
    }

    /// Serialises the header to little-endian bytes.
    pub fn to_le_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..NAME_LEN].copy_from_slice(&self.name);
        put_u32(&mut bytes, 32, self.cpu_set_size);
        put_u32(&mut bytes, 36, self.num_memory_regions);
        put_u32(&mut bytes, 40, self.num_irq_lines);
        put_u32(&mut bytes, 44, self.pio_bitmap_size);
        put_u32(&mut bytes, 48, self.num_pci_devices);
        bytes
    }

    /// Forces NUL termination of the name field of an encoded configuration.
    pub fn terminate_name(encoded: &mut [u8]) {
        if encoded.len() >= NAME_LEN {
            encoded[NAME_LEN - 1] = 0;
        }
    }
}

/// Set of core ids encoded as a little-endian bitmap (bit `n` is core `n`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuBitmap<'a> {
    bits: &'a [u8],
}

impl<'a> CpuBitmap<'a> {
    /// Wraps raw bitmap bytes.
    pub const fn new(bits: &'a [u8]) -> Self {
        Self { bits }
    }

    /// Returns whether core `cpu` is in the set.
    pub fn contains(&self, cpu: usize) -> bool {
        self.bits.get(cpu / 8).is_some_and(|byte| byte & (1 << (cpu % 8)) != 0)
    }

    /// Iterates the contained core ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + 'a {
        let bits = self.bits;
        (0..bits.len() * 8).filter(move |cpu| bits[cpu / 8] & (1 << (cpu % 8)) != 0)
    }

    /// Returns whether no core is set.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|b| *b == 0)
    }
}

/// Borrowed view over a complete, length-checked cell configuration.
#[derive(Clone, Copy, Debug)]
pub struct CellConfig<'a> {
    desc: CellDesc,
    bytes: &'a [u8],
}

impl<'a> CellConfig<'a> {
    /// Parses `bytes`, which must hold at least [`CellDesc::config_size`] bytes.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let desc = CellDesc::read_from(bytes)?;
        if bytes.len() < desc.config_size()? {
            return Err(AbiError::Truncated);
        }
        Ok(Self { desc, bytes })
    }

    /// Fixed header.
    pub fn desc(&self) -> &CellDesc {
        &self.desc
    }

    fn section(&self, index: usize, len: usize) -> &'a [u8] {
        // Offsets were validated against the slice length in `parse`.
        let start = self.desc.section_offset(index).unwrap_or(0);
        &self.bytes[start..start + len]
    }

    /// Requested cpus.
    pub fn cpus(&self) -> CpuBitmap<'a> {
        CpuBitmap::new(self.section(0, self.desc.cpu_set_size as usize))
    }

    /// Memory region `index`, if present.
    pub fn memory_region(&self, index: usize) -> Option<MemoryDesc> {
        if index >= self.desc.num_memory_regions as usize {
            return None;
        }
        let start = self.desc.section_offset(1).ok()? + index * MemoryDesc::SIZE;
        MemoryDesc::read_from(&self.bytes[start..]).ok()
    }

    /// Iterates all memory regions.
    pub fn memory_regions(&self) -> impl Iterator<Item = MemoryDesc> + '_ {
        (0..self.desc.num_memory_regions as usize).filter_map(move |i| self.memory_region(i))
    }

    /// IRQ line slots.
    pub fn irq_lines(&self) -> impl Iterator<Item = u64> + 'a {
        let raw = self.section(2, self.desc.num_irq_lines as usize * IRQ_SLOT_SIZE);
        raw.chunks_exact(IRQ_SLOT_SIZE).map(|slot| u64_at(slot, 0))
    }

    /// Port-I/O bitmap. A set bit denies access to the port.
    pub fn pio_bitmap(&self) -> &'a [u8] {
        self.section(3, self.desc.pio_bitmap_size as usize)
    }

    /// PCI device slots.
    pub fn pci_devices(&self) -> impl Iterator<Item = u64> + 'a {
        let raw = self.section(4, self.desc.num_pci_devices as usize * PCI_SLOT_SIZE);
        raw.chunks_exact(PCI_SLOT_SIZE).map(|slot| u64_at(slot, 0))
    }

    /// The whole configuration, trimmed to its declared size.
    pub fn as_bytes(&self) -> &'a [u8] {
        let len = self.desc.config_size().unwrap_or(self.bytes.len());
        &self.bytes[..len]
    }
}

/// Create-cell request as copied from the caller.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NewCellRequest {
    /// Caller address of the cell configuration.
    pub config_address: u64,
    /// Size of the cell configuration in bytes.
    pub config_size: u32,
    /// Number of [`PreloadImage`] descriptors that follow the request.
    pub num_preload_images: u32,
}

const_assert_eq!(core::mem::size_of::<NewCellRequest>(), NewCellRequest::SIZE);

impl NewCellRequest {
    /// Encoded size in bytes.
    pub const SIZE: usize = 16;

    /// Decodes the request from the start of `bytes`.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(AbiError::Truncated);
        }
        Ok(Self {
            config_address: u64_at(bytes, 0),
            config_size: u32_at(bytes, 8),
            num_preload_images: u32_at(bytes, 12),
        })
    }

    /// Serialises the request to little-endian bytes.
    pub fn to_le_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        put_u64(&mut bytes, 0, self.config_address);
        put_u32(&mut bytes, 8, self.config_size);
        put_u32(&mut bytes, 12, self.num_preload_images);
        bytes
    }
}

/// Image copied into cell RAM before the cell is created.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PreloadImage {
    /// Caller address of the image bytes.
    pub source_address: u64,
    /// Image length in bytes.
    pub size: u64,
    /// Offset inside the cell RAM.
    pub target_address: u64,
    /// Must be zero.
    pub padding: u64,
}

const_assert_eq!(core::mem::size_of::<PreloadImage>(), PreloadImage::SIZE);

impl PreloadImage {
    /// Encoded size in bytes.
    pub const SIZE: usize = 32;

    /// Decodes the descriptor from the start of `bytes`.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(AbiError::Truncated);
        }
        Ok(Self {
            source_address: u64_at(bytes, 0),
            size: u64_at(bytes, 8),
            target_address: u64_at(bytes, 16),
            padding: u64_at(bytes, 24),
        })
    }

    /// Serialises the descriptor to little-endian bytes.
    pub fn to_le_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        put_u64(&mut bytes, 0, self.source_address);
        put_u64(&mut bytes, 8, self.size);
        put_u64(&mut bytes, 16, self.target_address);
        put_u64(&mut bytes, 24, self.padding);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemFlags;
    use proptest::prelude::*;

    fn encode(desc: &CellDesc, cpus: &[u8], mem: &[MemoryDesc], pio: &[u8]) -> Vec<u8> {
        let mut out = desc.to_le_bytes().to_vec();
        out.extend_from_slice(cpus);
        for region in mem {
            out.extend_from_slice(&region.to_le_bytes());
        }
        out.extend_from_slice(pio);
        out
    }

    #[test]
    fn name_is_bounded_and_terminated() {
        let mut desc = CellDesc::default();
        desc.set_name("linux-demo").expect("name");
        assert_eq!(desc.name(), Some("linux-demo"));
        assert_eq!(desc.set_name(&"x".repeat(32)), Err(AbiError::NameTooLong));
        desc.name = [b'a'; NAME_LEN];
        assert_eq!(desc.name_bytes().len(), NAME_LEN - 1);
    }

    #[test]
    fn view_exposes_sections() {
        let mut desc = CellDesc {
            cpu_set_size: 8,
            num_memory_regions: 1,
            pio_bitmap_size: 4,
            ..CellDesc::default()
        };
        desc.set_name("minimal").expect("name");
        let ram = MemoryDesc::new(0x3bf0_0000, 0, 0x10_0000, MemFlags::READ | MemFlags::WRITE);
        let bytes = encode(&desc, &[0b1000, 0, 0, 0, 0, 0, 0, 0], &[ram], &[0xff, 0, 0xff, 0xff]);
        let cell = CellConfig::parse(&bytes).expect("parse");
        assert_eq!(cell.cpus().iter().collect::<Vec<_>>(), vec![3]);
        assert_eq!(cell.memory_region(0), Some(ram));
        assert_eq!(cell.memory_region(1), None);
        assert_eq!(cell.pio_bitmap(), &[0xff, 0, 0xff, 0xff]);
        assert_eq!(cell.as_bytes().len(), CellDesc::SIZE + 8 + 32 + 4);
    }

    #[test]
    fn truncated_configuration_is_rejected() {
        let desc = CellDesc { num_memory_regions: 2, ..CellDesc::default() };
        let bytes = encode(&desc, &[], &[MemoryDesc::default()], &[]);
        assert_eq!(CellConfig::parse(&bytes).err(), Some(AbiError::Truncated));
    }

    #[test]
    fn oversized_counts_overflow_instead_of_wrapping() {
        let desc = CellDesc {
            cpu_set_size: u32::MAX,
            num_memory_regions: u32::MAX,
            num_irq_lines: u32::MAX,
            pio_bitmap_size: u32::MAX,
            num_pci_devices: u32::MAX,
            ..CellDesc::default()
        };
        // On 64-bit hosts this fits, on 32-bit it overflows; both must not panic.
        let _ = desc.config_size();
    }

    proptest! {
        #[test]
        fn bitmap_iter_matches_contains(bits in proptest::collection::vec(any::<u8>(), 0..16)) {
            let map = CpuBitmap::new(&bits);
            let listed: Vec<usize> = map.iter().collect();
            for cpu in 0..bits.len() * 8 {
                prop_assert_eq!(map.contains(cpu), listed.contains(&cpu));
            }
            prop_assert_eq!(map.is_empty(), listed.is_empty());
        }
    }
}
