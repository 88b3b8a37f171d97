// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nexus_hv_abi::HypervisorHeader;
use parking_lot::Mutex;

use crate::hal::{Firmware, FirmwareStore};

/// In-memory firmware store counting handles not yet released.
#[derive(Default)]
pub struct SimFirmwareStore {
    images: Mutex<BTreeMap<String, Arc<[u8]>>>,
    outstanding: AtomicUsize,
}

impl SimFirmwareStore {
    /// Registers `bytes` under `name`, replacing any previous image.
    pub fn install(&self, name: &str, bytes: Vec<u8>) {
        self.images.lock().insert(name.to_string(), bytes.into());
    }

    /// Removes image `name`.
    pub fn remove(&self, name: &str) {
        self.images.lock().remove(name);
    }

    /// Handles requested but not released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

impl FirmwareStore for SimFirmwareStore {
    fn request(&self, name: &str) -> Option<Firmware> {
        let data = self.images.lock().get(name).cloned()?;
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Some(Firmware { name: name.to_string(), data })
    }

    fn release(&self, _firmware: Firmware) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builds a hypervisor image of `len` bytes (at least the header size).
///
/// Bytes after the header carry a recognisable pattern.
pub fn build_image(core_size: u64, percpu_size: u64, entry: u64, len: usize) -> Vec<u8> {
    let header = HypervisorHeader::new(core_size, percpu_size, entry);
    let mut image = header.to_le_bytes().to_vec();
    let body = len.saturating_sub(image.len());
    image.extend((0..body).map(|i| (i % 251) as u8 | 0x01));
    image
}
