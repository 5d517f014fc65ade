//! Multiple implementations of a simple interference graph, with varying performance characteristics.
//! Conceptually they are just sets of unordered pairs of integers.
//! All of them implement [`InterferenceGraph`]:
//!   contains(u, v)
//!   add_and_return_is_new_entry(u, v)
//!   add(u, v)
//!   clear()
//!   set_max_index(n)
//!   for_each(functor)
//!   size()
//!   memory_use()
//! Three implementations are provided:
//!   [`SmallInterferenceGraph`], a dense bit matrix. Fastest, but quadratic in the maximum index, so only
//!   used below [`MAX_SIZE_FOR_SMALL_INTERFERENCE_GRAPH`] tmps.
//!   [`LargeInterferenceGraph`], a hash set of packed `u16` pairs, as long as the indices fit in a `u16`.
//!   [`HugeInterferenceGraph`] otherwise, a hash set of packed `u32` pairs.

use std::{collections::HashSet, fmt::Debug, hash::Hash};

use num_traits::PrimInt;

use super::bitvector::BitVector;

pub const MAX_SIZE_FOR_SMALL_INTERFERENCE_GRAPH: usize = 400;

/// Node index width used by an allocator instance.
pub trait IndexType: PrimInt + Hash + Debug + std::fmt::Display + Default + 'static {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

impl IndexType for u16 {
    fn from_index(index: usize) -> Self {
        u16::try_from(index).expect("tmp index does not fit in u16")
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl IndexType for u32 {
    fn from_index(index: usize) -> Self {
        u32::try_from(index).expect("tmp index does not fit in u32")
    }

    fn index(self) -> usize {
        self as usize
    }
}

pub trait InterferenceGraph: Default {
    type IndexType: IndexType;

    fn contains(&self, u: Self::IndexType, v: Self::IndexType) -> bool;
    fn add_and_return_is_new_entry(&mut self, u: Self::IndexType, v: Self::IndexType) -> bool;

    fn add(&mut self, u: Self::IndexType, v: Self::IndexType) {
        self.add_and_return_is_new_entry(u, v);
    }

    fn clear(&mut self);
    fn set_max_index(&mut self, n: usize);

    /// Visits every edge exactly once.
    fn for_each(&self, f: impl FnMut(Self::IndexType, Self::IndexType));

    /// Number of edges.
    fn size(&self) -> usize;

    /// Approximate heap footprint in bytes.
    fn memory_use(&self) -> usize;
}

#[inline]
fn ordered<T: Ord>(u: T, v: T) -> (T, T) {
    if u < v {
        (u, v)
    } else {
        (v, u)
    }
}

#[derive(Default)]
pub struct SmallInterferenceGraph {
    bits: BitVector,
    max_index: usize,
    size: usize,
}

impl SmallInterferenceGraph {
    fn bit_index(&self, u: u16, v: u16) -> usize {
        let (low, high) = ordered(u as usize, v as usize);
        debug_assert!(high < self.max_index);
        low * self.max_index + high
    }
}

impl InterferenceGraph for SmallInterferenceGraph {
    type IndexType = u16;

    fn contains(&self, u: u16, v: u16) -> bool {
        self.bits.get(self.bit_index(u, v))
    }

    fn add_and_return_is_new_entry(&mut self, u: u16, v: u16) -> bool {
        let index = self.bit_index(u, v);
        let is_new = !self.bits.quick_set(index, true);
        if is_new {
            self.size += 1;
        }
        is_new
    }

    fn clear(&mut self) {
        self.bits.clear_all();
        self.size = 0;
    }

    fn set_max_index(&mut self, n: usize) {
        assert!(n <= u16::MAX as usize + 1);
        self.max_index = n;
        self.bits = BitVector::with_capacity(n * n);
        self.size = 0;
    }

    fn for_each(&self, mut f: impl FnMut(u16, u16)) {
        if self.max_index == 0 {
            return;
        }
        for index in self.bits.iter() {
            let u = index / self.max_index;
            let v = index % self.max_index;
            f(u as u16, v as u16);
        }
    }

    fn size(&self) -> usize {
        self.size
    }

    fn memory_use(&self) -> usize {
        (self.bits.len() + 7) / 8
    }
}

#[derive(Default)]
pub struct LargeInterferenceGraph {
    set: HashSet<u32>,
}

impl InterferenceGraph for LargeInterferenceGraph {
    type IndexType = u16;

    fn contains(&self, u: u16, v: u16) -> bool {
        let (low, high) = ordered(u, v);
        self.set.contains(&((low as u32) << 16 | high as u32))
    }

    fn add_and_return_is_new_entry(&mut self, u: u16, v: u16) -> bool {
        let (low, high) = ordered(u, v);
        self.set.insert((low as u32) << 16 | high as u32)
    }

    fn clear(&mut self) {
        self.set.clear();
    }

    fn set_max_index(&mut self, n: usize) {
        assert!(n <= u16::MAX as usize + 1);
    }

    fn for_each(&self, mut f: impl FnMut(u16, u16)) {
        for &packed in self.set.iter() {
            f((packed >> 16) as u16, packed as u16);
        }
    }

    fn size(&self) -> usize {
        self.set.len()
    }

    fn memory_use(&self) -> usize {
        self.set.capacity() * std::mem::size_of::<u32>()
    }
}

#[derive(Default)]
pub struct HugeInterferenceGraph {
    set: HashSet<u64>,
}

impl InterferenceGraph for HugeInterferenceGraph {
    type IndexType = u32;

    fn contains(&self, u: u32, v: u32) -> bool {
        let (low, high) = ordered(u, v);
        self.set.contains(&((low as u64) << 32 | high as u64))
    }

    fn add_and_return_is_new_entry(&mut self, u: u32, v: u32) -> bool {
        let (low, high) = ordered(u, v);
        self.set.insert((low as u64) << 32 | high as u64)
    }

    fn clear(&mut self) {
        self.set.clear();
    }

    fn set_max_index(&mut self, n: usize) {
        assert!(n <= u32::MAX as usize + 1);
    }

    fn for_each(&self, mut f: impl FnMut(u32, u32)) {
        for &packed in self.set.iter() {
            f((packed >> 32) as u32, packed as u32);
        }
    }

    fn size(&self) -> usize {
        self.set.len()
    }

    fn memory_use(&self) -> usize {
        self.set.capacity() * std::mem::size_of::<u64>()
    }
}
