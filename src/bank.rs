use crate::width::Width;

/// Register class. Allocation runs independently per bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i8)]
pub enum Bank {
    GP,
    FP,
}

pub const NUMBER_OF_BANKS: usize = 2;

impl Bank {
    pub const fn index(self) -> usize {
        match self {
            Bank::GP => 0,
            Bank::FP => 1,
        }
    }
}

pub fn for_each_bank(mut f: impl FnMut(Bank)) {
    f(Bank::GP);
    f(Bank::FP);
}

pub fn minimum_width(bank: Bank) -> Width {
    match bank {
        Bank::GP => Width::W8,
        Bank::FP => Width::W32,
    }
}

/// Widest value a register of this bank can hold.
pub fn conservative_width(bank: Bank) -> Width {
    match bank {
        Bank::GP => Width::W64,
        Bank::FP => Width::W128,
    }
}

impl std::fmt::Display for Bank {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Bank::GP => write!(f, "GP"),
            Bank::FP => write!(f, "FP"),
        }
    }
}
