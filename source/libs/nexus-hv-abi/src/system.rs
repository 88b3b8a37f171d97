// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! System configuration handed to the hypervisor at enable time.

use static_assertions::const_assert_eq;

use crate::memory::MemoryDesc;
use crate::{put_u32, u32_at, AbiError, Result};

/// Fixed header of a system configuration.
///
/// The header is followed by `config_size - SIZE` bytes of configuration that
/// the loader copies verbatim behind the hypervisor's per-cpu area.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemConfigHeader {
    /// Memory reserved for the hypervisor.
    pub hypervisor_memory: MemoryDesc,
    /// Total size of header plus trailing configuration.
    pub config_size: u32,
    /// Must be zero.
    pub reserved: u32,
}

const_assert_eq!(core::mem::size_of::<SystemConfigHeader>(), SystemConfigHeader::SIZE);

impl SystemConfigHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 40;

    /// Creates a header for a configuration with `blob_len` trailing bytes.
    pub fn new(hypervisor_memory: MemoryDesc, blob_len: usize) -> Result<Self> {
        let total = blob_len.checked_add(Self::SIZE).ok_or(AbiError::SizeOverflow)?;
        let config_size = u32::try_from(total).map_err(|_| AbiError::SizeOverflow)?;
        Ok(Self { hypervisor_memory, config_size, reserved: 0 })
    }

    /// Bytes following the header, or `None` if `config_size` is smaller than the header.
    pub fn blob_size(&self) -> Option<usize> {
        (self.config_size as usize).checked_sub(Self::SIZE)
    }

    /// Decodes the header from the start of `bytes`.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(AbiError::Truncated);
        }
        Ok(Self {
            hypervisor_memory: MemoryDesc::read_from(bytes)?,
            config_size: u32_at(bytes, 32),
            reserved: u32_at(bytes, 36),
        })
    }

    /// Serialises the header to little-endian bytes.
    pub fn to_le_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..MemoryDesc::SIZE].copy_from_slice(&self.hypervisor_memory.to_le_bytes());
        put_u32(&mut bytes, 32, self.config_size);
        put_u32(&mut bytes, 36, self.reserved);
        bytes
    }
}
