// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared ABI for the nexus-hv partitioning hypervisor
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module + tests/layout.rs
//! PUBLIC API: MemoryDesc, MemFlags, HypervisorHeader, SystemConfigHeader, CellDesc,
//!             CellConfig, NewCellRequest, PreloadImage, op/hypercall/errno constants
//! DEPENDS_ON: bitflags, static_assertions
//! INVARIANTS: All descriptors are packed little-endian; sizes are fixed and asserted at
//!             compile time; decoders never read past the provided slice

pub mod cell;
pub mod header;
pub mod memory;
pub mod system;

pub use cell::{CellConfig, CellDesc, CpuBitmap, NewCellRequest, PreloadImage};
pub use header::HypervisorHeader;
pub use memory::{MemFlags, MemoryDesc};
pub use system::SystemConfigHeader;

use core::fmt;

/// Result type returned by ABI decoders.
pub type Result<T> = core::result::Result<T, AbiError>;

/// Errors surfaced while decoding or encoding descriptors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiError {
    /// Input slice is shorter than the descriptor it should contain.
    Truncated,
    /// Cell name does not fit the fixed name field.
    NameTooLong,
    /// A size computed from descriptor fields overflows `usize`.
    SizeOverflow,
}

impl fmt::Display for AbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiError::Truncated => f.write_str("descriptor truncated"),
            AbiError::NameTooLong => f.write_str("cell name too long"),
            AbiError::SizeOverflow => f.write_str("descriptor size overflow"),
        }
    }
}

/// Control-device operation codes.
pub mod op {
    /// Loads and activates the hypervisor (`arg` = system config address).
    pub const ENABLE: u32 = 0;
    /// Deactivates the hypervisor (`arg` unused).
    pub const DISABLE: u32 = 1;
    /// Creates a cell (`arg` = create-cell request address).
    pub const CELL_CREATE: u32 = 2;
    /// Destroys a cell (`arg` = cell name address). Not implemented by the loader.
    pub const CELL_DESTROY: u32 = 3;
}

/// Hypercall numbers understood by the hypervisor.
pub mod hypercall {
    /// Leave hypervisor mode on the calling cpu.
    pub const DISABLE: u32 = 0;
    /// Create a cell from the descriptor at the physical address in `arg`.
    pub const CELL_CREATE: u32 = 1;
}

/// Errno values used on the control surface. Results are reported negated.
pub mod errno {
    /// Operation not permitted.
    pub const EPERM: i32 = 1;
    /// No such file or directory.
    pub const ENOENT: i32 = 2;
    /// Interrupted system call.
    pub const EINTR: i32 = 4;
    /// I/O error.
    pub const EIO: i32 = 5;
    /// Out of memory.
    pub const ENOMEM: i32 = 12;
    /// Bad address.
    pub const EFAULT: i32 = 14;
    /// Device or resource busy.
    pub const EBUSY: i32 = 16;
    /// No such device.
    pub const ENODEV: i32 = 19;
    /// Invalid argument.
    pub const EINVAL: i32 = 22;
    /// Not enough space.
    pub const ENOSPC: i32 = 28;
    /// Function not implemented.
    pub const ENOSYS: i32 = 38;
}

#[inline]
pub(crate) fn u32_at(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
pub(crate) fn u64_at(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

#[inline]
pub(crate) fn put_u32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn put_u64(out: &mut [u8], at: usize, value: u64) {
    out[at..at + 8].copy_from_slice(&value.to_le_bytes());
}
