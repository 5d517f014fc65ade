use crate::{bank::Bank, width::Width};

pub const NUMBER_OF_REGISTERS: usize = 32;
pub const NUMBER_OF_FP_REGISTERS: usize = 32;

/// Reg is a polymorphic register structure. It can refer to either integer or float registers.
/// GPRs occupy indices `0..NUMBER_OF_REGISTERS`, FPRs follow them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg {
    index: u8,
}

impl Reg {
    pub const fn new_gpr(number: u8) -> Reg {
        assert!((number as usize) < NUMBER_OF_REGISTERS);
        Reg { index: number }
    }

    pub const fn new_fpr(number: u8) -> Reg {
        assert!((number as usize) < NUMBER_OF_FP_REGISTERS);
        Reg {
            index: number + NUMBER_OF_REGISTERS as u8,
        }
    }

    pub const fn from_index(index: u8) -> Reg {
        Reg { index }
    }

    pub const fn index(self) -> usize {
        self.index as _
    }

    pub const fn is_gpr(self) -> bool {
        (self.index as usize) < NUMBER_OF_REGISTERS
    }

    pub const fn is_fpr(self) -> bool {
        ((self.index as usize).wrapping_sub(NUMBER_OF_REGISTERS)) < NUMBER_OF_FP_REGISTERS
    }

    /// Register number within its bank.
    pub const fn gpr(self) -> u8 {
        assert!(self.is_gpr());
        self.index
    }

    pub const fn fpr(self) -> u8 {
        assert!(self.is_fpr());
        self.index - NUMBER_OF_REGISTERS as u8
    }

    pub fn bank(self) -> Bank {
        if self.is_gpr() {
            Bank::GP
        } else {
            Bank::FP
        }
    }

    pub const fn first() -> Reg {
        Reg { index: 0 }
    }

    pub const fn last() -> Reg {
        Reg {
            index: (NUMBER_OF_REGISTERS + NUMBER_OF_FP_REGISTERS - 1) as u8,
        }
    }

    pub const fn is_set(self) -> bool {
        self.index != Self::invalid()
    }

    const fn invalid() -> u8 {
        (1 << 7) - 1
    }

    pub fn conservative_width(self) -> Width {
        if self.is_fpr() {
            Width::W128
        } else {
            Width::W64
        }
    }

    pub fn conservative_width_without_vectors(self) -> Width {
        Width::W64
    }

    pub fn all() -> impl Iterator<Item = Reg> {
        (Reg::first().index..=Reg::last().index).map(Reg::from_index)
    }
}

impl Default for Reg {
    fn default() -> Self {
        Reg {
            index: Self::invalid(),
        }
    }
}

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_set() {
            write!(f, "<none>")
        } else if self.is_gpr() {
            write!(f, "%r{}", self.gpr())
        } else {
            write!(f, "%f{}", self.fpr())
        }
    }
}
