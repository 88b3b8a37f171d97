// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host kernel boundary.
//!
//! The loader never touches page tables, cpu hotplug or the firmware loader
//! directly. Every such service is reached through one of these traits so the
//! protocol can run against the simulated machine in [`crate::host`] as well
//! as against a real kernel.

use std::fmt;
use std::sync::Arc;

use nexus_hv_abi::MemFlags;

use crate::cpu::{CpuId, CpuSet};
use crate::error::Result;

/// A live mapping of a physical range into the host address space.
///
/// Offsets are relative to the start of the mapping. Accesses outside
/// `0..len()` fail with [`crate::HvError::ArgumentInvalid`].
pub trait Mapping: Send + Sync {
    /// First physical byte of the mapping.
    fn phys_start(&self) -> u64;
    /// Host address the range is mapped at.
    fn virt_start(&self) -> u64;
    /// Length in bytes.
    fn len(&self) -> u64;
    /// Returns whether the mapping is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Copies bytes out of the mapping.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
    /// Copies bytes into the mapping.
    fn write(&self, offset: u64, data: &[u8]) -> Result<()>;
    /// Sets `len` bytes starting at `offset` to `byte`.
    fn fill(&self, offset: u64, len: u64, byte: u8) -> Result<()>;
}

/// Physical memory remapping and contiguous buffer allocation.
pub trait PhysMapper: Send + Sync {
    /// Maps `size` bytes at `phys` with the given access rights.
    fn map(&self, phys: u64, size: u64, prot: MemFlags) -> Option<Box<dyn Mapping>>;
    /// Tears down a mapping returned by [`PhysMapper::map`]. The handle is
    /// dropped by the caller afterwards and must not be used again.
    fn unmap(&self, mapping: &dyn Mapping);
    /// Allocates a physically contiguous, DMA-reachable kernel buffer.
    fn alloc_contiguous(&self, size: u64) -> Option<Box<dyn Mapping>>;
    /// Frees a buffer returned by [`PhysMapper::alloc_contiguous`].
    fn free_contiguous(&self, buffer: &dyn Mapping);
}

/// Cpu hotplug, cross-core calls and preemption control.
pub trait CpuControl: Send + Sync {
    /// Number of cores that can ever be online.
    fn possible_cpus(&self) -> usize;
    /// Cores currently online.
    fn online_cpus(&self) -> CpuSet;
    /// Returns whether `cpu` is online.
    fn is_online(&self, cpu: CpuId) -> bool;
    /// Takes `cpu` offline. Errors are negative errno values.
    fn cpu_down(&self, cpu: CpuId) -> core::result::Result<(), i32>;
    /// Brings `cpu` back online. Errors are negative errno values.
    fn cpu_up(&self, cpu: CpuId) -> core::result::Result<(), i32>;
    /// Core the caller is running on.
    fn current_cpu(&self) -> CpuId;
    /// Runs `f` on every online core, the calling core included.
    ///
    /// Invocations on different cores run concurrently; `f` may wait for the
    /// other cores and must not deadlock because of it.
    fn on_each_cpu(&self, f: &(dyn Fn(CpuId) + Sync));
    /// Disables preemption on the calling core. Nests.
    fn preempt_disable(&self);
    /// Reverts one [`CpuControl::preempt_disable`].
    fn preempt_enable(&self);
}

/// Firmware image as handed out by the store.
#[derive(Clone)]
pub struct Firmware {
    /// Name the image was requested under.
    pub name: String,
    /// Raw image bytes.
    pub data: Arc<[u8]>,
}

impl fmt::Debug for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Firmware").field("name", &self.name).field("len", &self.data.len()).finish()
    }
}

/// Firmware image lookup.
pub trait FirmwareStore: Send + Sync {
    /// Fetches image `name`.
    fn request(&self, name: &str) -> Option<Firmware>;
    /// Returns an image obtained from [`FirmwareStore::request`].
    fn release(&self, firmware: Firmware);
}

/// Privileged transitions into and calls to the hypervisor.
pub trait HypervisorPort: Send + Sync {
    /// Jumps to `entry` inside the mapped image on `cpu`. Returns 0 once the
    /// core resumes under the hypervisor, or a negative error code.
    fn enter(&self, image: &dyn Mapping, entry: u64, cpu: CpuId) -> i32;
    /// Issues hypercall `code` with `arg` on `cpu`.
    fn hypercall(&self, cpu: CpuId, code: u32, arg: u64) -> i32;
}

/// Reference count keeping the loader module alive while it is in use.
pub trait ModuleRef: Send + Sync {
    /// Takes a reference; fails while the module is being unloaded.
    fn try_get(&self) -> bool;
    /// Drops a reference taken with [`ModuleRef::try_get`].
    fn put(&self);
}

/// Fault raised while reading caller memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    /// First address that could not be read.
    pub addr: u64,
}

/// Calling process as seen by the control surface.
pub trait CallerContext {
    /// Copies `buf.len()` bytes from caller address `addr`.
    fn copy_from_user(&self, addr: u64, buf: &mut [u8]) -> core::result::Result<(), Fault>;
    /// Returns whether a signal is pending for the caller.
    fn signal_pending(&self) -> bool;
}

/// All collaborators the loader needs.
#[derive(Clone)]
pub struct Platform {
    /// Physical memory mapper.
    pub mapper: Arc<dyn PhysMapper>,
    /// Cpu control.
    pub cpus: Arc<dyn CpuControl>,
    /// Firmware store.
    pub firmware: Arc<dyn FirmwareStore>,
    /// Hypervisor entry and hypercalls.
    pub hypervisor: Arc<dyn HypervisorPort>,
    /// Module reference count.
    pub module: Arc<dyn ModuleRef>,
}

/// Scoped module reference. Dropped without [`ModuleGuard::keep`] it is put back.
pub(crate) struct ModuleGuard<'a> {
    module: &'a dyn ModuleRef,
    armed: bool,
}

impl<'a> ModuleGuard<'a> {
    pub(crate) fn acquire(module: &'a dyn ModuleRef) -> Option<Self> {
        module.try_get().then_some(Self { module, armed: true })
    }

    /// Leaves the reference taken; it is put back by the disable path.
    pub(crate) fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for ModuleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.module.put();
        }
    }
}

/// Scoped firmware handle, released on drop.
pub(crate) struct FirmwareGuard<'a> {
    store: &'a dyn FirmwareStore,
    firmware: Option<Firmware>,
}

impl<'a> FirmwareGuard<'a> {
    pub(crate) fn request(store: &'a dyn FirmwareStore, name: &str) -> Option<Self> {
        store.request(name).map(|firmware| Self { store, firmware: Some(firmware) })
    }

    pub(crate) fn data(&self) -> &[u8] {
        self.firmware.as_ref().map(|fw| &fw.data[..]).unwrap_or(&[])
    }
}

impl Drop for FirmwareGuard<'_> {
    fn drop(&mut self) {
        if let Some(firmware) = self.firmware.take() {
            self.store.release(firmware);
        }
    }
}

/// Disables preemption on the current core for the guard's lifetime.
pub struct PreemptGuard<'a> {
    cpus: &'a dyn CpuControl,
}

impl<'a> PreemptGuard<'a> {
    /// Disables preemption until the guard is dropped.
    pub fn new(cpus: &'a dyn CpuControl) -> Self {
        cpus.preempt_disable();
        Self { cpus }
    }
}

impl Drop for PreemptGuard<'_> {
    fn drop(&mut self) {
        self.cpus.preempt_enable();
    }
}
