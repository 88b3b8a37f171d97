// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Interruptible coordination lock.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{HvError, Result};
use crate::hal::CallerContext;

/// Mutex whose acquisition gives up once the caller has a signal pending.
pub struct CoordinationLock<T> {
    inner: Mutex<T>,
    poll: Duration,
}

impl<T> CoordinationLock<T> {
    /// Wraps `value`; waiters re-check for signals every `poll`.
    pub fn new(value: T, poll: Duration) -> Self {
        Self { inner: Mutex::new(value), poll }
    }

    /// Acquires the lock, failing with `Interrupted` if a signal arrives while
    /// waiting. An uncontended lock is taken even with a signal pending.
    pub fn lock_interruptible(&self, caller: &dyn CallerContext) -> Result<MutexGuard<'_, T>> {
        if let Some(guard) = self.inner.try_lock() {
            return Ok(guard);
        }
        loop {
            if caller.signal_pending() {
                return Err(HvError::Interrupted);
            }
            if let Some(guard) = self.inner.try_lock_for(self.poll) {
                return Ok(guard);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Fault;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[derive(Default)]
    struct Signals(AtomicBool);

    impl CallerContext for Signals {
        fn copy_from_user(&self, addr: u64, _buf: &mut [u8]) -> core::result::Result<(), Fault> {
            Err(Fault { addr })
        }

        fn signal_pending(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn uncontended_lock_ignores_signals() {
        let lock = CoordinationLock::new(1u32, Duration::from_millis(1));
        let caller = Signals(AtomicBool::new(true));
        assert_eq!(*lock.lock_interruptible(&caller).expect("lock"), 1);
    }

    #[test]
    fn contended_lock_is_interrupted() {
        let lock = CoordinationLock::new((), Duration::from_millis(1));
        let _held = lock.inner.lock();
        let caller = Signals(AtomicBool::new(true));
        assert_eq!(lock.lock_interruptible(&caller).err(), Some(HvError::Interrupted));
    }

    #[test]
    fn waiter_gets_lock_after_release() {
        let lock = Arc::new(CoordinationLock::new(0u32, Duration::from_millis(1)));
        let held = lock.inner.lock();
        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                let caller = Signals::default();
                let mut guard = lock.lock_interruptible(&caller).expect("lock");
                *guard += 1;
            })
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        waiter.join().expect("join");
        assert_eq!(*lock.inner.lock(), 1);
    }
}
