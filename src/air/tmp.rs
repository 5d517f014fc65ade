use crate::{
    bank::Bank,
    jit::reg::{Reg, NUMBER_OF_FP_REGISTERS, NUMBER_OF_REGISTERS},
};

/// A Tmp is a generalization of a register. It can be used to refer to any GPR or FPR. It can also
/// be used to refer to an unallocated register (i.e. a temporary). Like many Air classes, we use
/// deliberately terse naming since we will have to use this name a lot.
///
/// The encoding is signed: GP tmps are positive, FP tmps are negative and zero means "no tmp".
/// Registers occupy the smallest magnitudes of their bank, temporaries follow them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Tmp {
    value: i32,
}

impl Tmp {
    const fn encode_gp(index: usize) -> i32 {
        1 + index as i32
    }

    const fn encode_fp(index: usize) -> i32 {
        -1 - (index as i32)
    }

    const fn encode_gp_tmp(index: usize) -> i32 {
        Self::encode_gp(NUMBER_OF_REGISTERS) + index as i32
    }

    const fn encode_fp_tmp(index: usize) -> i32 {
        Self::encode_fp(NUMBER_OF_FP_REGISTERS) - index as i32
    }

    const fn is_encoded_gpr(value: i32) -> bool {
        value > 0 && value <= NUMBER_OF_REGISTERS as i32
    }

    const fn is_encoded_fpr(value: i32) -> bool {
        value < 0 && value >= -(NUMBER_OF_FP_REGISTERS as i32)
    }

    pub const fn empty() -> Self {
        Self { value: 0 }
    }

    pub const fn from_reg(reg: Reg) -> Self {
        if reg.is_gpr() {
            Self {
                value: Self::encode_gp(reg.gpr() as usize),
            }
        } else {
            Self {
                value: Self::encode_fp(reg.fpr() as usize),
            }
        }
    }

    pub const fn gp_tmp_for_index(index: usize) -> Self {
        Self {
            value: Self::encode_gp_tmp(index),
        }
    }

    pub const fn fp_tmp_for_index(index: usize) -> Self {
        Self {
            value: Self::encode_fp_tmp(index),
        }
    }

    pub const fn tmp_for_index(bank: Bank, index: usize) -> Self {
        match bank {
            Bank::GP => Self::gp_tmp_for_index(index),
            Bank::FP => Self::fp_tmp_for_index(index),
        }
    }

    pub const fn is_set(self) -> bool {
        self.value != 0
    }

    pub const fn is_gp(self) -> bool {
        self.value > 0
    }

    pub const fn is_fp(self) -> bool {
        self.value < 0
    }

    pub fn bank(self) -> Bank {
        debug_assert!(self.is_set());
        if self.is_gp() {
            Bank::GP
        } else {
            Bank::FP
        }
    }

    pub const fn is_gpr(self) -> bool {
        Self::is_encoded_gpr(self.value)
    }

    pub const fn is_fpr(self) -> bool {
        Self::is_encoded_fpr(self.value)
    }

    pub const fn is_reg(self) -> bool {
        self.is_gpr() || self.is_fpr()
    }

    pub fn reg(self) -> Reg {
        assert!(self.is_reg(), "{} is not a register", self);
        if self.is_gpr() {
            Reg::new_gpr((self.value - 1) as u8)
        } else {
            Reg::new_fpr((-self.value - 1) as u8)
        }
    }

    pub const fn has_tmp_index(self) -> bool {
        self.is_set() && !self.is_reg()
    }

    /// Index of a temporary within its bank, starting at zero.
    pub fn tmp_index(self) -> usize {
        assert!(self.has_tmp_index(), "{} has no tmp index", self);
        self.absolute_index() - Self::last_machine_register_index() - 1
    }

    pub const fn internal_value(self) -> i32 {
        self.value
    }

    /// Dense per-bank index: zero is unused, registers come first, temporaries follow.
    pub fn absolute_index(self) -> usize {
        debug_assert!(self.is_set());
        self.value.unsigned_abs() as usize
    }

    pub fn tmp_for_absolute_index(bank: Bank, index: usize) -> Self {
        match bank {
            Bank::GP => Self {
                value: index as i32,
            },
            Bank::FP => Self {
                value: -(index as i32),
            },
        }
    }

    /// Both banks have the same number of registers, so the register range of the absolute index
    /// space is the same for both.
    pub const fn last_machine_register_index() -> usize {
        NUMBER_OF_REGISTERS
    }

    /// Size of an array indexed by absolute index that covers `num_tmps` temporaries.
    pub const fn absolute_index_for_tmp_count(num_tmps: usize) -> usize {
        Self::last_machine_register_index() + 1 + num_tmps
    }
}

const _: () = assert!(NUMBER_OF_REGISTERS == NUMBER_OF_FP_REGISTERS);

impl From<Reg> for Tmp {
    fn from(reg: Reg) -> Self {
        Tmp::from_reg(reg)
    }
}

impl std::fmt::Display for Tmp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_set() {
            write!(f, "<none>")
        } else if self.is_reg() {
            write!(f, "{}", self.reg())
        } else if self.is_gp() {
            write!(f, "%tmp{}", self.tmp_index())
        } else {
            write!(f, "%ftmp{}", self.tmp_index())
        }
    }
}
