// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Physical memory descriptors.

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::{put_u64, u64_at, AbiError, Result};

bitflags! {
    /// Access rights attached to a memory descriptor.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemFlags: u64 {
        /// Readable.
        const READ = 1 << 0;
        /// Writable.
        const WRITE = 1 << 1;
        /// Executable.
        const EXECUTE = 1 << 2;
        /// Reachable by DMA-capable devices assigned to the owner.
        const DMA = 1 << 3;
    }
}

/// A physical range as it appears in system and cell descriptors.
///
/// `virt_start` is the guest-physical address the range appears at inside a
/// cell; the loader itself only uses `phys_start` and `size`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryDesc {
    /// First host-physical byte.
    pub phys_start: u64,
    /// Address the range is exposed at inside the owning cell.
    pub virt_start: u64,
    /// Length in bytes.
    pub size: u64,
    /// Raw [`MemFlags`] bits.
    pub flags: u64,
}

const_assert_eq!(core::mem::size_of::<MemoryDesc>(), MemoryDesc::SIZE);

impl MemoryDesc {
    /// Encoded size in bytes.
    pub const SIZE: usize = 32;

    /// Creates a descriptor from its parts.
    pub const fn new(phys_start: u64, virt_start: u64, size: u64, flags: MemFlags) -> Self {
        Self { phys_start, virt_start, size, flags: flags.bits() }
    }

    /// Returns the access flags, dropping unknown bits.
    pub fn access(&self) -> MemFlags {
        MemFlags::from_bits_truncate(self.flags)
    }

    /// Returns the exclusive end address, or `None` on overflow.
    pub fn phys_end(&self) -> Option<u64> {
        self.phys_start.checked_add(self.size)
    }

    /// Serialises the descriptor to little-endian bytes.
    pub fn to_le_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        put_u64(&mut bytes, 0, self.phys_start);
        put_u64(&mut bytes, 8, self.virt_start);
        put_u64(&mut bytes, 16, self.size);
        put_u64(&mut bytes, 24, self.flags);
        bytes
    }

    /// Decodes a descriptor from the start of `bytes`.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(AbiError::Truncated);
        }
        Ok(Self {
            phys_start: u64_at(bytes, 0),
            virt_start: u64_at(bytes, 8),
            size: u64_at(bytes, 16),
            flags: u64_at(bytes, 24),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_fields_in_order() {
        let desc = MemoryDesc::new(0x3bf0_0000, 0, 0x10_0000, MemFlags::READ | MemFlags::WRITE);
        let bytes = desc.to_le_bytes();
        assert_eq!(&bytes[0..8], &0x3bf0_0000u64.to_le_bytes());
        assert_eq!(&bytes[16..24], &0x10_0000u64.to_le_bytes());
        assert_eq!(bytes[24], 0b11);
        assert_eq!(MemoryDesc::read_from(&bytes), Ok(desc));
    }

    #[test]
    fn rejects_short_input() {
        assert_eq!(MemoryDesc::read_from(&[0u8; 31]), Err(AbiError::Truncated));
    }

    #[test]
    fn unknown_flag_bits_are_ignored() {
        let desc = MemoryDesc { flags: 0xff00 | MemFlags::EXECUTE.bits(), ..MemoryDesc::default() };
        assert_eq!(desc.access(), MemFlags::EXECUTE);
    }
}
