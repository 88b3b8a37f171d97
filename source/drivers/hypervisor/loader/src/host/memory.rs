// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::PAGE;

/// Sparse physical memory. Pages that were never written read as zero.
#[derive(Default)]
pub struct SimPhysMemory {
    pages: Mutex<BTreeMap<u64, Box<[u8]>>>,
}

impl SimPhysMemory {
    /// Empty memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `buf.len()` bytes at `phys`.
    pub fn read(&self, phys: u64, buf: &mut [u8]) {
        let pages = self.pages.lock();
        for_each_chunk(phys, buf.len() as u64, |page, offset, done, len| {
            let dst = &mut buf[done..done + len];
            match pages.get(&page) {
                Some(bytes) => dst.copy_from_slice(&bytes[offset..offset + len]),
                None => dst.fill(0),
            }
        });
    }

    /// Writes `data` at `phys`.
    pub fn write(&self, phys: u64, data: &[u8]) {
        let mut pages = self.pages.lock();
        for_each_chunk(phys, data.len() as u64, |page, offset, done, len| {
            let bytes = pages.entry(page).or_insert_with(zero_page);
            bytes[offset..offset + len].copy_from_slice(&data[done..done + len]);
        });
    }

    /// Sets `len` bytes at `phys` to `byte`. Zeroing whole pages releases them.
    pub fn fill(&self, phys: u64, len: u64, byte: u8) {
        let mut pages = self.pages.lock();
        for_each_chunk(phys, len, |page, offset, _, chunk| {
            if byte == 0 {
                if chunk == PAGE as usize {
                    pages.remove(&page);
                } else if let Some(bytes) = pages.get_mut(&page) {
                    bytes[offset..offset + chunk].fill(0);
                }
            } else {
                let bytes = pages.entry(page).or_insert_with(zero_page);
                bytes[offset..offset + chunk].fill(byte);
            }
        });
    }

    /// Number of pages holding data.
    pub fn resident_pages(&self) -> usize {
        self.pages.lock().len()
    }
}

fn zero_page() -> Box<[u8]> {
    vec![0u8; PAGE as usize].into_boxed_slice()
}

// Calls `f(page_index, offset_in_page, bytes_done, chunk_len)` per page touched.
fn for_each_chunk(phys: u64, len: u64, mut f: impl FnMut(u64, usize, usize, usize)) {
    let mut done = 0u64;
    while done < len {
        let addr = phys + done;
        let offset = addr % PAGE;
        let chunk = (PAGE - offset).min(len - done);
        f(addr / PAGE, offset as usize, done as usize, chunk as usize);
        done += chunk;
    }
}
