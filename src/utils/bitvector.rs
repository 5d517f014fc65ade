use bitvec::vec::BitVec;

/// Resizeable bit vector used for the allocator's per-tmp flags.
///
/// - `set`, `get` and `clear` resize automatically (reads past the end report `false`).
/// - `quick_*` accessors skip the resize and `assert!` that the index is in bounds.
/// - Bits are automatically initialized to zero.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BitVector {
    bits: BitVec,
}

impl BitVector {
    pub fn new() -> Self {
        Self { bits: BitVec::new() }
    }

    pub fn with_capacity(num_bits: usize) -> Self {
        let mut result = Self::new();
        result.ensure_size(num_bits);
        result
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn ensure_size(&mut self, num_bits: usize) {
        if num_bits > self.bits.len() {
            self.bits.resize(num_bits, false);
        }
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits.get(index).map(|bit| *bit).unwrap_or(false)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.get(index)
    }

    pub fn quick_get(&self, index: usize) -> bool {
        assert!(index < self.bits.len());
        self.bits[index]
    }

    /// Returns the previous value of the bit.
    pub fn set(&mut self, index: usize, value: bool) -> bool {
        self.ensure_size(index + 1);
        self.bits.replace(index, value)
    }

    pub fn quick_set(&mut self, index: usize, value: bool) -> bool {
        assert!(index < self.bits.len());
        self.bits.replace(index, value)
    }

    pub fn clear(&mut self, index: usize) -> bool {
        if index >= self.bits.len() {
            return false;
        }
        self.bits.replace(index, false)
    }

    pub fn quick_clear(&mut self, index: usize) -> bool {
        assert!(index < self.bits.len());
        self.bits.replace(index, false)
    }

    pub fn clear_all(&mut self) {
        self.bits.fill(false);
    }

    /// True when no bit is set, regardless of the capacity.
    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    pub fn bit_count(&self) -> usize {
        self.bits.count_ones()
    }

    /// Indices of the set bits, in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    pub fn merge(&mut self, other: &Self) {
        self.ensure_size(other.len());
        for index in other.iter() {
            self.bits.set(index, true);
        }
    }
}

impl std::fmt::Debug for BitVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for BitVector {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut result = Self::new();
        for index in iter {
            result.set(index, true);
        }
        result
    }
}
