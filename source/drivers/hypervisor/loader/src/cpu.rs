// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core identifiers and core sets.

use std::collections::BTreeSet;
use std::fmt;

use nexus_hv_abi::CpuBitmap;

use crate::error::{HvError, Result};

/// Logical core identifier as used by the host kernel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct CpuId(u16);

impl CpuId {
    /// Core the host booted on.
    pub const BOOT: Self = Self(0);

    /// Wraps a raw core number.
    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw core number.
    #[inline]
    pub const fn as_raw(self) -> u16 {
        self.0
    }

    /// Core number as a slice index.
    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }

    /// Returns whether this is the boot core.
    #[inline]
    pub const fn is_boot(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

/// Ordered set of cores. Iteration is always in ascending core-id order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuSet(BTreeSet<CpuId>);

impl CpuSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a cell cpu bitmap. Core ids beyond the `u16` range are rejected.
    pub fn from_bitmap(bitmap: CpuBitmap<'_>) -> Result<Self> {
        bitmap
            .iter()
            .map(|cpu| u16::try_from(cpu).map(CpuId::from_raw).map_err(|_| HvError::ArgumentInvalid))
            .collect()
    }

    /// Adds `cpu`; returns whether it was newly inserted.
    pub fn insert(&mut self, cpu: CpuId) -> bool {
        self.0.insert(cpu)
    }

    /// Removes `cpu`; returns whether it was present.
    pub fn remove(&mut self, cpu: CpuId) -> bool {
        self.0.remove(&cpu)
    }

    /// Returns whether `cpu` is in the set.
    pub fn contains(&self, cpu: CpuId) -> bool {
        self.0.contains(&cpu)
    }

    /// Number of cores in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cores in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = CpuId> + '_ {
        self.0.iter().copied()
    }

    /// Empties the set, returning its previous contents.
    pub fn take(&mut self) -> CpuSet {
        core::mem::take(self)
    }
}

impl FromIterator<CpuId> for CpuSet {
    fn from_iter<I: IntoIterator<Item = CpuId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a CpuSet {
    type Item = CpuId;
    type IntoIter = core::iter::Copied<std::collections::btree_set::Iter<'a, CpuId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, cpu) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{cpu}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_decodes_in_order() {
        let bits = [0b0000_1100u8, 0b0000_0001];
        let set = CpuSet::from_bitmap(CpuBitmap::new(&bits)).expect("set");
        let ids: Vec<u16> = set.iter().map(CpuId::as_raw).collect();
        assert_eq!(ids, vec![2, 3, 8]);
        assert_eq!(set.to_string(), "{2,3,8}");
    }

    #[test]
    fn take_leaves_empty_set() {
        let mut set: CpuSet = [CpuId::from_raw(1), CpuId::from_raw(3)].into_iter().collect();
        let taken = set.take();
        assert!(set.is_empty());
        assert_eq!(taken.len(), 2);
        assert!(taken.contains(CpuId::from_raw(3)));
    }

    #[test]
    fn boot_cpu_is_zero() {
        assert!(CpuId::BOOT.is_boot());
        assert!(!CpuId::from_raw(1).is_boot());
        assert_eq!(CpuId::from_raw(7).as_index(), 7);
    }
}
