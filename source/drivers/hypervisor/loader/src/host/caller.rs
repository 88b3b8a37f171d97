// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{page_align, PAGE};
use crate::hal::{CallerContext, Fault, ModuleRef};

const USER_BASE: u64 = 0x7000_0000;

/// Caller whose address space holds only what was placed into it.
pub struct HostCaller {
    segments: Mutex<BTreeMap<u64, Vec<u8>>>,
    next: AtomicU64,
    signal: AtomicBool,
}

impl Default for HostCaller {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCaller {
    /// Empty address space, no signal pending.
    pub fn new() -> Self {
        Self { segments: Mutex::new(BTreeMap::new()), next: AtomicU64::new(USER_BASE), signal: AtomicBool::new(false) }
    }

    /// Copies `bytes` into the address space and returns their address.
    /// Segments are separated by an unmapped guard page.
    pub fn place(&self, bytes: &[u8]) -> u64 {
        let span = page_align(bytes.len().max(1) as u64) + PAGE;
        let addr = self.next.fetch_add(span, Ordering::SeqCst);
        self.segments.lock().insert(addr, bytes.to_vec());
        addr
    }

    /// Marks a signal pending.
    pub fn raise_signal(&self) {
        self.signal.store(true, Ordering::SeqCst);
    }

    /// Clears the pending signal.
    pub fn clear_signal(&self) {
        self.signal.store(false, Ordering::SeqCst);
    }
}

impl CallerContext for HostCaller {
    fn copy_from_user(&self, addr: u64, buf: &mut [u8]) -> Result<(), Fault> {
        if buf.is_empty() {
            return Ok(());
        }
        let segments = self.segments.lock();
        let (start, bytes) = segments.range(..=addr).next_back().ok_or(Fault { addr })?;
        let offset = (addr - start) as usize;
        let end = offset.checked_add(buf.len()).ok_or(Fault { addr })?;
        if offset >= bytes.len() {
            return Err(Fault { addr });
        }
        if end > bytes.len() {
            return Err(Fault { addr: start + bytes.len() as u64 });
        }
        buf.copy_from_slice(&bytes[offset..end]);
        Ok(())
    }

    fn signal_pending(&self) -> bool {
        self.signal.load(Ordering::SeqCst)
    }
}

/// Module reference count that can be put into the unloading state.
#[derive(Default)]
pub struct SimModule {
    refs: AtomicUsize,
    unloading: AtomicBool,
}

impl SimModule {
    /// References currently held.
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    /// Starts unloading; later `try_get` calls fail.
    pub fn begin_unload(&self) {
        self.unloading.store(true, Ordering::SeqCst);
    }
}

impl ModuleRef for SimModule {
    fn try_get(&self) -> bool {
        if self.unloading.load(Ordering::SeqCst) {
            return false;
        }
        self.refs.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn put(&self) {
        self.refs.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_outside_placed_segments_fault() {
        let caller = HostCaller::new();
        let addr = caller.place(&[1, 2, 3, 4]);
        let mut buf = [0u8; 4];
        caller.copy_from_user(addr, &mut buf).expect("copy");
        assert_eq!(buf, [1, 2, 3, 4]);

        let mut long = [0u8; 5];
        assert_eq!(caller.copy_from_user(addr, &mut long), Err(Fault { addr: addr + 4 }));
        assert!(caller.copy_from_user(addr - 1, &mut buf).is_err());
        assert!(caller.copy_from_user(addr + 0x800, &mut buf).is_err());
    }

    #[test]
    fn unloading_module_refuses_references() {
        let module = SimModule::default();
        assert!(module.try_get());
        module.begin_unload();
        assert!(!module.try_get());
        assert_eq!(module.refs(), 1);
    }
}
