// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use nexus_hv_abi::errno;
use parking_lot::Mutex;

use crate::cpu::{CpuId, CpuSet};
use crate::hal::CpuControl;

thread_local! {
    static CURRENT_CPU: Cell<u16> = const { Cell::new(0) };
}

#[derive(Default)]
struct Hotplug {
    online: CpuSet,
    down_failures: BTreeMap<CpuId, i32>,
    up_failures: BTreeMap<CpuId, i32>,
}

/// Simulated cores. Threads outside a broadcast run on the boot core.
pub struct SimCpus {
    possible: usize,
    hotplug: Mutex<Hotplug>,
    preempt_depth: AtomicUsize,
    broadcasts: AtomicUsize,
}

impl SimCpus {
    /// `possible` cores, all online.
    pub fn new(possible: usize) -> Self {
        let online = (0..possible).map(|cpu| CpuId::from_raw(cpu as u16)).collect();
        Self {
            possible,
            hotplug: Mutex::new(Hotplug { online, ..Hotplug::default() }),
            preempt_depth: AtomicUsize::new(0),
            broadcasts: AtomicUsize::new(0),
        }
    }

    /// Makes `cpu_down(cpu)` fail with `code` until cleared.
    pub fn fail_cpu_down(&self, cpu: CpuId, code: i32) {
        self.hotplug.lock().down_failures.insert(cpu, code);
    }

    /// Makes `cpu_up(cpu)` fail with `code` until cleared.
    pub fn fail_cpu_up(&self, cpu: CpuId, code: i32) {
        self.hotplug.lock().up_failures.insert(cpu, code);
    }

    /// Removes all injected hotplug failures.
    pub fn clear_failures(&self) {
        let mut hotplug = self.hotplug.lock();
        hotplug.down_failures.clear();
        hotplug.up_failures.clear();
    }

    /// Current preemption-disable nesting depth.
    pub fn preempt_depth(&self) -> usize {
        self.preempt_depth.load(Ordering::SeqCst)
    }

    /// Number of `on_each_cpu` calls so far.
    pub fn broadcasts(&self) -> usize {
        self.broadcasts.load(Ordering::SeqCst)
    }
}

impl CpuControl for SimCpus {
    fn possible_cpus(&self) -> usize {
        self.possible
    }

    fn online_cpus(&self) -> CpuSet {
        self.hotplug.lock().online.clone()
    }

    fn is_online(&self, cpu: CpuId) -> bool {
        self.hotplug.lock().online.contains(cpu)
    }

    fn cpu_down(&self, cpu: CpuId) -> core::result::Result<(), i32> {
        let mut hotplug = self.hotplug.lock();
        if cpu.as_index() >= self.possible {
            return Err(-errno::EINVAL);
        }
        if cpu.is_boot() {
            return Err(-errno::EBUSY);
        }
        if let Some(code) = hotplug.down_failures.get(&cpu) {
            return Err(*code);
        }
        if !hotplug.online.remove(cpu) {
            return Err(-errno::EINVAL);
        }
        Ok(())
    }

    fn cpu_up(&self, cpu: CpuId) -> core::result::Result<(), i32> {
        let mut hotplug = self.hotplug.lock();
        if cpu.as_index() >= self.possible {
            return Err(-errno::EINVAL);
        }
        if let Some(code) = hotplug.up_failures.get(&cpu) {
            return Err(*code);
        }
        hotplug.online.insert(cpu);
        Ok(())
    }

    fn current_cpu(&self) -> CpuId {
        CpuId::from_raw(CURRENT_CPU.with(Cell::get))
    }

    fn on_each_cpu(&self, f: &(dyn Fn(CpuId) + Sync)) {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        let online = self.online_cpus();
        thread::scope(|scope| {
            for cpu in &online {
                scope.spawn(move || {
                    CURRENT_CPU.with(|current| current.set(cpu.as_raw()));
                    f(cpu);
                });
            }
        });
    }

    fn preempt_disable(&self) {
        self.preempt_depth.fetch_add(1, Ordering::SeqCst);
    }

    fn preempt_enable(&self) {
        self.preempt_depth.fetch_sub(1, Ordering::SeqCst);
    }
}
