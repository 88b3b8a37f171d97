// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Header at the start of every hypervisor image.
//!
//! The first four fields are produced by the hypervisor build; the loader
//! patches the remaining ones into the mapped copy before entering it.

use static_assertions::const_assert_eq;

use crate::{put_u32, put_u64, u32_at, u64_at, AbiError, Result};

/// Image signature.
pub const SIGNATURE: [u8; 8] = *b"NXHVISOR";

/// Image header as laid out at offset 0 of the firmware file.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HypervisorHeader {
    /// Must equal [`SIGNATURE`].
    pub signature: [u8; 8],
    /// End of the image's uninitialised data, relative to the image base.
    pub core_size: u64,
    /// Bytes of per-cpu scratch the hypervisor needs for each possible cpu.
    pub percpu_size: u64,
    /// Entry point offset relative to the image base.
    pub entry: u64,
    /// Number of possible cpus (patched by the loader).
    pub possible_cpus: u32,
    /// Number of cpus online at entry (patched by the loader).
    pub online_cpus: u32,
    /// Mapped address minus physical address of the image (patched by the loader).
    pub page_offset: u64,
    /// Total reserved memory size (patched by the loader).
    pub size: u64,
}

const_assert_eq!(core::mem::size_of::<HypervisorHeader>(), HypervisorHeader::SIZE);

impl HypervisorHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 56;
    /// Offset of `possible_cpus`.
    pub const POSSIBLE_CPUS_OFFSET: usize = 32;
    /// Offset of `online_cpus`.
    pub const ONLINE_CPUS_OFFSET: usize = 36;
    /// Offset of `page_offset`.
    pub const PAGE_OFFSET_OFFSET: usize = 40;
    /// Offset of `size`.
    pub const SIZE_OFFSET: usize = 48;

    /// Builds an unpatched header as emitted by the hypervisor build.
    pub const fn new(core_size: u64, percpu_size: u64, entry: u64) -> Self {
        Self {
            signature: SIGNATURE,
            core_size,
            percpu_size,
            entry,
            possible_cpus: 0,
            online_cpus: 0,
            page_offset: 0,
            size: 0,
        }
    }

    /// Returns whether the signature matches [`SIGNATURE`].
    pub fn signature_valid(&self) -> bool {
        self.signature == SIGNATURE
    }

    /// Decodes the header from the start of an image.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(AbiError::Truncated);
        }
        let mut signature = [0u8; 8];
        signature.copy_from_slice(&bytes[0..8]);
        Ok(Self {
            signature,
            core_size: u64_at(bytes, 8),
            percpu_size: u64_at(bytes, 16),
            entry: u64_at(bytes, 24),
            possible_cpus: u32_at(bytes, Self::POSSIBLE_CPUS_OFFSET),
            online_cpus: u32_at(bytes, Self::ONLINE_CPUS_OFFSET),
            page_offset: u64_at(bytes, Self::PAGE_OFFSET_OFFSET),
            size: u64_at(bytes, Self::SIZE_OFFSET),
        })
    }

    /// Serialises the header to little-endian bytes.
    pub fn to_le_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..8].copy_from_slice(&self.signature);
        put_u64(&mut bytes, 8, self.core_size);
        put_u64(&mut bytes, 16, self.percpu_size);
        put_u64(&mut bytes, 24, self.entry);
        put_u32(&mut bytes, Self::POSSIBLE_CPUS_OFFSET, self.possible_cpus);
        put_u32(&mut bytes, Self::ONLINE_CPUS_OFFSET, self.online_cpus);
        put_u64(&mut bytes, Self::PAGE_OFFSET_OFFSET, self.page_offset);
        put_u64(&mut bytes, Self::SIZE_OFFSET, self.size);
        bytes
    }
}
