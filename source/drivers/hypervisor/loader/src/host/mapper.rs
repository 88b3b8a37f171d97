// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nexus_hv_abi::MemFlags;
use parking_lot::Mutex;

use super::{page_align, SimPhysMemory, PAGE};
use crate::error::{HvError, Result};
use crate::hal::{Mapping, PhysMapper};

const VIRT_BASE: u64 = 0xffff_8000_0000_0000;
const DMA_BASE: u64 = 0x0100_0000;
const DEFAULT_MAX_CONTIGUOUS: u64 = 4 * 1024 * 1024;

/// Window onto [`SimPhysMemory`].
pub struct SimMapping {
    memory: Arc<SimPhysMemory>,
    phys: u64,
    virt: u64,
    len: u64,
    prot: MemFlags,
}

impl SimMapping {
    fn check(&self, offset: u64, len: u64) -> Result<u64> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(self.phys + offset),
            _ => Err(HvError::ArgumentInvalid),
        }
    }

    /// Access rights the range was mapped with.
    pub fn prot(&self) -> MemFlags {
        self.prot
    }
}

impl Mapping for SimMapping {
    fn phys_start(&self) -> u64 {
        self.phys
    }

    fn virt_start(&self) -> u64 {
        self.virt
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let phys = self.check(offset, buf.len() as u64)?;
        self.memory.read(phys, buf);
        Ok(())
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.prot.contains(MemFlags::WRITE) {
            return Err(HvError::ArgumentInvalid);
        }
        let phys = self.check(offset, data.len() as u64)?;
        self.memory.write(phys, data);
        Ok(())
    }

    fn fill(&self, offset: u64, len: u64, byte: u8) -> Result<()> {
        if !self.prot.contains(MemFlags::WRITE) {
            return Err(HvError::ArgumentInvalid);
        }
        let phys = self.check(offset, len)?;
        self.memory.fill(phys, len, byte);
        Ok(())
    }
}

#[derive(Default)]
struct Tables {
    next_virt: u64,
    next_dma: u64,
    // virt -> (phys, len)
    mappings: BTreeMap<u64, (u64, u64)>,
    buffers: BTreeMap<u64, (u64, u64)>,
}

/// Mapper that refuses overlapping mappings and tracks every live handle.
pub struct SimMapper {
    memory: Arc<SimPhysMemory>,
    tables: Mutex<Tables>,
    fail_next_map: AtomicBool,
    max_contiguous: Mutex<u64>,
}

impl SimMapper {
    /// Mapper over `memory`.
    pub fn new(memory: Arc<SimPhysMemory>) -> Self {
        Self {
            memory,
            tables: Mutex::new(Tables { next_virt: VIRT_BASE, next_dma: DMA_BASE, ..Tables::default() }),
            fail_next_map: AtomicBool::new(false),
            max_contiguous: Mutex::new(DEFAULT_MAX_CONTIGUOUS),
        }
    }

    /// Makes the next [`PhysMapper::map`] call fail.
    pub fn fail_next_map(&self) {
        self.fail_next_map.store(true, Ordering::SeqCst);
    }

    /// Caps the size of contiguous allocations.
    pub fn set_max_contiguous(&self, bytes: u64) {
        *self.max_contiguous.lock() = bytes;
    }

    /// Live mappings created by `map`.
    pub fn active_mappings(&self) -> usize {
        self.tables.lock().mappings.len()
    }

    /// Live contiguous buffers.
    pub fn outstanding_buffers(&self) -> usize {
        self.tables.lock().buffers.len()
    }

    /// Returns whether a live mapping covers physical address `phys`.
    pub fn is_mapped(&self, phys: u64) -> bool {
        self.tables.lock().mappings.values().any(|(start, len)| phys >= *start && phys - start < *len)
    }

    fn handle(&self, phys: u64, virt: u64, len: u64, prot: MemFlags) -> Box<dyn Mapping> {
        Box::new(SimMapping { memory: Arc::clone(&self.memory), phys, virt, len, prot })
    }
}

fn overlaps(a_start: u64, a_len: u64, b_start: u64, b_len: u64) -> bool {
    a_start < b_start.saturating_add(b_len) && b_start < a_start.saturating_add(a_len)
}

impl PhysMapper for SimMapper {
    fn map(&self, phys: u64, size: u64, prot: MemFlags) -> Option<Box<dyn Mapping>> {
        if self.fail_next_map.swap(false, Ordering::SeqCst) || size == 0 {
            return None;
        }
        phys.checked_add(size)?;
        let mut tables = self.tables.lock();
        if tables.mappings.values().any(|(start, len)| overlaps(phys, size, *start, *len)) {
            return None;
        }
        let virt = tables.next_virt + phys % PAGE;
        tables.next_virt += page_align(size + phys % PAGE) + PAGE;
        tables.mappings.insert(virt, (phys, size));
        Some(self.handle(phys, virt, size, prot))
    }

    fn unmap(&self, mapping: &dyn Mapping) {
        self.tables.lock().mappings.remove(&mapping.virt_start());
    }

    fn alloc_contiguous(&self, size: u64) -> Option<Box<dyn Mapping>> {
        if size == 0 || size > *self.max_contiguous.lock() {
            return None;
        }
        let mut tables = self.tables.lock();
        let phys = tables.next_dma;
        tables.next_dma += page_align(size) + PAGE;
        let virt = tables.next_virt;
        tables.next_virt += page_align(size) + PAGE;
        tables.buffers.insert(virt, (phys, size));
        drop(tables);
        self.memory.fill(phys, page_align(size), 0);
        Some(self.handle(phys, virt, size, MemFlags::READ | MemFlags::WRITE))
    }

    fn free_contiguous(&self, buffer: &dyn Mapping) {
        self.tables.lock().buffers.remove(&buffer.virt_start());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_mappings_are_refused() {
        let mapper = SimMapper::new(Arc::new(SimPhysMemory::new()));
        let first = mapper.map(0x4000_0000, 0x40_0000, MemFlags::READ).expect("map");
        assert!(mapper.map(0x4020_0000, 0x1000, MemFlags::READ).is_none());
        assert!(mapper.map(0x4040_0000, 0x1000, MemFlags::READ).is_some());
        assert!(mapper.is_mapped(0x403f_ffff));
        mapper.unmap(&*first);
        assert!(!mapper.is_mapped(0x403f_ffff));
    }

    #[test]
    fn read_only_mappings_reject_writes() {
        let mapper = SimMapper::new(Arc::new(SimPhysMemory::new()));
        let ro = mapper.map(0x1000, 0x1000, MemFlags::READ).expect("map");
        assert_eq!(ro.write(0, &[1]), Err(HvError::ArgumentInvalid));
        let rw = mapper.map(0x8000, 0x1000, MemFlags::READ | MemFlags::WRITE).expect("map");
        assert_eq!(rw.write(0xfff, &[1, 2]), Err(HvError::ArgumentInvalid));
        assert!(rw.write(0xffe, &[1, 2]).is_ok());
    }

    #[test]
    fn contiguous_buffers_are_capped_and_tracked() {
        let mapper = SimMapper::new(Arc::new(SimPhysMemory::new()));
        mapper.set_max_contiguous(0x2000);
        assert!(mapper.alloc_contiguous(0x2001).is_none());
        let buf = mapper.alloc_contiguous(0x2000).expect("alloc");
        assert_eq!(mapper.outstanding_buffers(), 1);
        mapper.free_contiguous(&*buf);
        assert_eq!(mapper.outstanding_buffers(), 0);
    }
}
