// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Memory regions and scoped mappings.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use nexus_hv_abi::{MemFlags, MemoryDesc};

use crate::error::{HvError, Result};
use crate::hal::{CallerContext, Mapping, PhysMapper};

const COPY_CHUNK: usize = 4096;

/// A physical range used as hypervisor or cell memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// First physical byte.
    pub physical_start: u64,
    /// Host address while mapped.
    pub mapped_address: Option<u64>,
    /// Length in bytes, never zero.
    pub size: u64,
    /// Access rights.
    pub permissions: MemFlags,
}

impl MemoryRegion {
    /// Builds a region from its wire descriptor.
    pub fn from_desc(desc: &MemoryDesc) -> Result<Self> {
        if desc.size == 0 || desc.phys_end().is_none() {
            return Err(HvError::ArgumentInvalid);
        }
        Ok(Self {
            physical_start: desc.phys_start,
            mapped_address: None,
            size: desc.size,
            permissions: desc.access(),
        })
    }

    /// Maps the region with `prot`. The mapping is torn down when the returned
    /// handle is dropped.
    pub fn map(&self, mapper: &Arc<dyn PhysMapper>, prot: MemFlags) -> Result<MappedRegion> {
        let mapping = mapper.map(self.physical_start, self.size, prot).ok_or(HvError::MapFailed)?;
        let region = Self { mapped_address: Some(mapping.virt_start()), permissions: prot, ..*self };
        Ok(MappedRegion { mapper: Arc::clone(mapper), region, mapping, release: Release::Unmap })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    Unmap,
    Free,
}

/// Owned mapping handle; unmaps (or frees, for contiguous buffers) on drop.
pub struct MappedRegion {
    mapper: Arc<dyn PhysMapper>,
    region: MemoryRegion,
    mapping: Box<dyn Mapping>,
    release: Release,
}

impl MappedRegion {
    /// Allocates a physically contiguous kernel buffer of `size` bytes.
    pub fn alloc_contiguous(mapper: &Arc<dyn PhysMapper>, size: u64) -> Result<Self> {
        let mapping = mapper.alloc_contiguous(size).ok_or(HvError::OutOfMemory)?;
        let region = MemoryRegion {
            physical_start: mapping.phys_start(),
            mapped_address: Some(mapping.virt_start()),
            size,
            permissions: MemFlags::READ | MemFlags::WRITE | MemFlags::DMA,
        };
        Ok(Self { mapper: Arc::clone(mapper), region, mapping, release: Release::Free })
    }

    /// The mapped region, with `mapped_address` set.
    pub fn region(&self) -> &MemoryRegion {
        &self.region
    }

    /// Host address minus physical address of the mapping.
    pub fn page_offset(&self) -> u64 {
        self.mapping.virt_start().wrapping_sub(self.mapping.phys_start())
    }

    /// Copies `len` bytes from caller address `src` to `offset` in the
    /// mapping. A caller fault is reported as `on_fault`.
    pub fn copy_from_caller(
        &self,
        caller: &dyn CallerContext,
        offset: u64,
        src: u64,
        len: u64,
        on_fault: HvError,
    ) -> Result<()> {
        let end = offset.checked_add(len).ok_or(HvError::ArgumentInvalid)?;
        if end > self.mapping.len() {
            return Err(HvError::ArgumentInvalid);
        }
        let mut chunk = [0u8; COPY_CHUNK];
        let mut done = 0u64;
        while done < len {
            let step = (len - done).min(COPY_CHUNK as u64) as usize;
            let src_addr = src.checked_add(done).ok_or(on_fault)?;
            caller.copy_from_user(src_addr, &mut chunk[..step]).map_err(|_| on_fault)?;
            self.mapping.write(offset + done, &chunk[..step])?;
            done += step as u64;
        }
        Ok(())
    }
}

impl Deref for MappedRegion {
    type Target = dyn Mapping;

    fn deref(&self) -> &Self::Target {
        &*self.mapping
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion").field("region", &self.region).field("release", &self.release).finish()
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        match self.release {
            Release::Unmap => self.mapper.unmap(&*self.mapping),
            Release::Free => self.mapper.free_contiguous(&*self.mapping),
        }
    }
}

#[cfg(all(test, feature = "backend-host"))]
mod tests {
    use super::*;
    use crate::host::{HostCaller, SimMachine};

    #[test]
    fn zero_sized_descriptor_is_rejected() {
        let desc = MemoryDesc::new(0x1000, 0, 0, MemFlags::READ);
        assert_eq!(MemoryRegion::from_desc(&desc), Err(HvError::ArgumentInvalid));
        let wrap = MemoryDesc::new(u64::MAX, 0, 2, MemFlags::READ);
        assert_eq!(MemoryRegion::from_desc(&wrap), Err(HvError::ArgumentInvalid));
    }

    #[test]
    fn mapping_is_released_on_drop() {
        let machine = SimMachine::new(1);
        let mapper: Arc<dyn PhysMapper> = machine.mapper.clone();
        let region =
            MemoryRegion::from_desc(&MemoryDesc::new(0x4000_0000, 0, 0x2000, MemFlags::READ)).expect("region");
        {
            let mapped = region.map(&mapper, MemFlags::READ | MemFlags::WRITE).expect("map");
            assert!(mapped.region().mapped_address.is_some());
            assert_eq!(machine.mapper.active_mappings(), 1);
        }
        assert_eq!(machine.mapper.active_mappings(), 0);
    }

    #[test]
    fn copy_from_caller_spans_chunks_and_reports_faults() {
        let machine = SimMachine::new(1);
        let mapper: Arc<dyn PhysMapper> = machine.mapper.clone();
        let caller = HostCaller::new();
        let payload: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let src = caller.place(&payload);

        let region =
            MemoryRegion::from_desc(&MemoryDesc::new(0x4000_0000, 0, 0x4000, MemFlags::READ)).expect("region");
        let mapped = region.map(&mapper, MemFlags::READ | MemFlags::WRITE).expect("map");
        mapped
            .copy_from_caller(&caller, 0x10, src, payload.len() as u64, HvError::PreloadCopyFailed)
            .expect("copy");
        let mut back = vec![0u8; payload.len()];
        mapped.read(0x10, &mut back).expect("read");
        assert_eq!(back, payload);

        let fault = mapped.copy_from_caller(&caller, 0, src + 0x3000, 0x1000, HvError::PreloadCopyFailed);
        assert_eq!(fault, Err(HvError::PreloadCopyFailed));
    }
}
