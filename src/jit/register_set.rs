use crate::{bank::Bank, width::Width};

use super::reg::{Reg, NUMBER_OF_FP_REGISTERS, NUMBER_OF_REGISTERS};

/// How much of a clobbered register survives the clobber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PreservedWidth {
    PreservesNothing,
    Preserves64,
}

/// Set of registers. Each member is tracked in two halves: `bits` covers the low 64 bits of the
/// register and `upper_bits` covers everything above. A register that is only present in
/// `upper_bits` keeps its low 64 bits when the set is used as a clobber set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegisterSet {
    bits: u64,
    upper_bits: u64,
}

const _: () = assert!(NUMBER_OF_REGISTERS + NUMBER_OF_FP_REGISTERS <= 64);

impl RegisterSet {
    pub const fn new() -> Self {
        Self {
            bits: 0,
            upper_bits: 0,
        }
    }

    pub fn from_regs(regs: &[Reg]) -> Self {
        let mut result = Self::new();
        for &reg in regs {
            result.add(reg, reg.conservative_width());
        }
        result
    }

    pub fn all_gprs() -> Self {
        let mut result = Self::new();
        for reg in Reg::all().filter(|reg| reg.is_gpr()) {
            result.add(reg, Width::W64);
        }
        result
    }

    pub fn all_fprs() -> Self {
        let mut result = Self::new();
        for reg in Reg::all().filter(|reg| reg.is_fpr()) {
            result.add(reg, Width::W128);
        }
        result
    }

    pub fn add(&mut self, reg: Reg, width: Width) -> &mut Self {
        self.bits |= 1 << reg.index();

        if width > reg.conservative_width_without_vectors() {
            self.upper_bits |= 1 << reg.index();
        }

        self
    }

    /// Adds only the bits above the low 64 of `reg`.
    pub fn add_upper_half(&mut self, reg: Reg) -> &mut Self {
        self.upper_bits |= 1 << reg.index();
        self
    }

    pub fn remove(&mut self, reg: Reg) -> &mut Self {
        self.bits &= !(1 << reg.index());
        self.upper_bits &= !(1 << reg.index());
        self
    }

    pub fn contains(&self, reg: Reg) -> bool {
        ((self.bits | self.upper_bits) >> reg.index()) & 1 != 0
    }

    pub fn merge(&mut self, other: &Self) -> &mut Self {
        self.bits |= other.bits;
        self.upper_bits |= other.upper_bits;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0 && self.upper_bits == 0
    }

    pub fn number_of_set_registers(&self) -> usize {
        (self.bits | self.upper_bits).count_ones() as usize
    }

    pub fn for_each(&self, mut f: impl FnMut(Reg)) {
        let mut all = self.bits | self.upper_bits;
        while all != 0 {
            let index = all.trailing_zeros();
            all &= all - 1;
            f(Reg::from_index(index as u8));
        }
    }

    pub fn for_each_in_bank(&self, bank: Bank, mut f: impl FnMut(Reg)) {
        self.for_each(|reg| {
            if reg.bank() == bank {
                f(reg);
            }
        })
    }

    pub fn for_each_with_width_and_preserved(&self, mut f: impl FnMut(Reg, Width, PreservedWidth)) {
        self.for_each(|reg| {
            let includes_lower = (self.bits >> reg.index()) & 1 != 0;
            let includes_upper = (self.upper_bits >> reg.index()) & 1 != 0;

            let preserved = if !includes_lower && includes_upper {
                PreservedWidth::Preserves64
            } else {
                PreservedWidth::PreservesNothing
            };

            let width = if includes_upper {
                reg.conservative_width()
            } else {
                reg.conservative_width_without_vectors()
            };

            f(reg, width, preserved);
        });
    }
}

impl std::fmt::Display for RegisterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut result = Ok(());
        let mut first = true;
        write!(f, "[")?;
        self.for_each(|reg| {
            if result.is_err() {
                return;
            }
            if !first {
                result = write!(f, ", ");
            }
            first = false;
            if result.is_ok() {
                result = write!(f, "{}", reg);
            }
        });
        result?;
        write!(f, "]")
    }
}
