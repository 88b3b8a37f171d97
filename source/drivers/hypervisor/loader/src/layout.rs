// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Placement of the hypervisor image inside its reserved memory.
//!
//! ```text
//! 0              core_size          core_size + percpu_size      region size
//! | image + bss  | per-cpu areas    | system configuration  | free  |
//! ```

use nexus_hv_abi::HypervisorHeader;

use crate::error::{HvError, Result};

/// Validates the image header and returns it.
///
/// Images shorter than their header count as a signature mismatch.
pub fn validate_image(image: &[u8]) -> Result<HypervisorHeader> {
    let header = HypervisorHeader::read_from(image).map_err(|_| HvError::SignatureMismatch)?;
    if !header.signature_valid() {
        return Err(HvError::SignatureMismatch);
    }
    Ok(header)
}

/// Rounds `value` up to a multiple of `align`, which must be a power of two.
pub fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    let mask = align - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

/// Offsets of the reserved sub-regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    /// Page-aligned end of the image's uninitialised data.
    pub core_size: u64,
    /// Per-cpu area size for all possible cpus.
    pub percpu_size: u64,
    /// System configuration size, header included.
    pub config_size: u64,
    /// Size of the reserved memory.
    pub region_size: u64,
}

impl ImageLayout {
    /// Computes and validates the layout.
    ///
    /// Fails with `LayoutOverflow` unless `core + percpu + config` is strictly
    /// smaller than the region and the raw image fits the region.
    pub fn compute(
        header: &HypervisorHeader,
        image_len: u64,
        region_size: u64,
        config_size: u64,
        possible_cpus: usize,
        page_size: u64,
    ) -> Result<Self> {
        let core_size = align_up(header.core_size, page_size).ok_or(HvError::LayoutOverflow)?;
        let percpu_size =
            (possible_cpus as u64).checked_mul(header.percpu_size).ok_or(HvError::LayoutOverflow)?;
        let total = core_size
            .checked_add(percpu_size)
            .and_then(|sum| sum.checked_add(config_size))
            .ok_or(HvError::LayoutOverflow)?;
        if total >= region_size || image_len > region_size {
            return Err(HvError::LayoutOverflow);
        }
        Ok(Self { core_size, percpu_size, config_size, region_size })
    }

    /// Offset of the first per-cpu area.
    pub fn percpu_offset(&self) -> u64 {
        self.core_size
    }

    /// Offset the system configuration is copied to.
    pub fn config_offset(&self) -> u64 {
        self.core_size + self.percpu_size
    }
}
