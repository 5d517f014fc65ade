use crate::{bank::Bank, jit::reg::Reg, width::Width};

use super::{stack_slot::StackSlotId, tmp::Tmp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum ArgKind {
    #[default]
    Invalid,

    // Either an unassigned temporary or a register. All unassigned temporaries eventually become
    // registers or stack slots.
    Tmp,

    // Imm fits in 32 bits and can be inlined into most instructions. BigImm is a full 64-bit
    // constant that only Move can materialize.
    Imm,
    BigImm,

    // Memory operands. An Addr is a GP base tmp plus an offset, Stack is an offset into a stack slot.
    Addr,
    Stack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ArgTemperature {
    Cold,
    Warm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArgRole {
    /// Read before anything else happens in the instruction.
    Use,

    /// Like `Use`, but replacing the operand with a stack slot is free.
    ColdUse,

    /// Read after the instruction's defs happened.
    LateUse,

    /// Combination of `LateUse` and `ColdUse`.
    LateColdUse,

    /// Written after everything else.
    Def,

    /// A `Def` that zero-fills the bits above its width when the target is a register or a spill
    /// slot.
    ZDef,

    UseDef,

    UseZDef,

    /// Written before the instruction starts executing.
    EarlyDef,

    EarlyZDef,

    /// Defined early and used late, so it interferes with everything the instruction touches.
    Scratch,

    /// Evaluates an address without loading from it. Only valid on memory operands.
    UseAddr,
}

impl ArgRole {
    pub const fn is_any_use(self) -> bool {
        matches!(
            self,
            ArgRole::Use
                | ArgRole::ColdUse
                | ArgRole::LateUse
                | ArgRole::LateColdUse
                | ArgRole::UseDef
                | ArgRole::UseZDef
                | ArgRole::Scratch
        )
    }

    pub const fn is_cold_use(self) -> bool {
        matches!(self, ArgRole::ColdUse | ArgRole::LateColdUse)
    }

    pub const fn is_warm_use(self) -> bool {
        self.is_any_use() && !self.is_cold_use()
    }

    pub const fn temperature(self) -> ArgTemperature {
        if self.is_cold_use() {
            ArgTemperature::Cold
        } else {
            ArgTemperature::Warm
        }
    }

    pub const fn is_early_use(self) -> bool {
        matches!(
            self,
            Self::Use | Self::ColdUse | Self::UseDef | Self::UseZDef | Self::UseAddr
        )
    }

    pub const fn is_late_use(self) -> bool {
        matches!(self, Self::LateUse | Self::LateColdUse | Self::Scratch)
    }

    pub const fn is_any_def(self) -> bool {
        matches!(
            self,
            Self::Def
                | Self::UseDef
                | Self::ZDef
                | Self::UseZDef
                | Self::EarlyDef
                | Self::EarlyZDef
                | Self::Scratch
        )
    }

    pub const fn is_early_def(self) -> bool {
        matches!(self, Self::EarlyDef | Self::EarlyZDef | Self::Scratch)
    }

    pub const fn is_late_def(self) -> bool {
        matches!(self, Self::Def | Self::UseDef | Self::ZDef | Self::UseZDef)
    }

    pub const fn is_zdef(self) -> bool {
        matches!(self, Self::ZDef | Self::UseZDef | Self::EarlyZDef)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Arg {
    kind: ArgKind,
    offset: i64,
    base: Tmp,
    slot: StackSlotId,
}

impl Arg {
    pub fn tmp(tmp: Tmp) -> Self {
        assert!(tmp.is_set());
        Self {
            kind: ArgKind::Tmp,
            base: tmp,
            ..Default::default()
        }
    }

    pub fn reg(reg: Reg) -> Self {
        Self::tmp(Tmp::from_reg(reg))
    }

    pub fn imm(value: i64) -> Self {
        assert!(Self::is_valid_imm_form(value), "{} does not fit in an Imm", value);
        Self {
            kind: ArgKind::Imm,
            offset: value,
            ..Default::default()
        }
    }

    pub fn big_imm(value: i64) -> Self {
        Self {
            kind: ArgKind::BigImm,
            offset: value,
            ..Default::default()
        }
    }

    /// `Imm` when the value fits, `BigImm` otherwise.
    pub fn imm_or_big_imm(value: i64) -> Self {
        if Self::is_valid_imm_form(value) {
            Self::imm(value)
        } else {
            Self::big_imm(value)
        }
    }

    pub fn addr(base: Tmp, offset: i64) -> Self {
        assert!(base.is_gp());
        Self {
            kind: ArgKind::Addr,
            offset,
            base,
            ..Default::default()
        }
    }

    pub fn stack(slot: StackSlotId, offset: i64) -> Self {
        Self {
            kind: ArgKind::Stack,
            offset,
            slot,
            ..Default::default()
        }
    }

    pub const fn is_valid_imm_form(value: i64) -> bool {
        value == value as i32 as i64
    }

    pub fn kind(&self) -> ArgKind {
        self.kind
    }

    pub fn is_invalid(&self) -> bool {
        self.kind == ArgKind::Invalid
    }

    pub fn is_tmp(&self) -> bool {
        self.kind == ArgKind::Tmp
    }

    pub fn is_reg(&self) -> bool {
        self.is_tmp() && self.base.is_reg()
    }

    pub fn is_gp_tmp(&self) -> bool {
        self.is_tmp() && self.base.is_gp()
    }

    pub fn is_fp_tmp(&self) -> bool {
        self.is_tmp() && self.base.is_fp()
    }

    pub fn is_imm(&self) -> bool {
        self.kind == ArgKind::Imm
    }

    pub fn is_big_imm(&self) -> bool {
        self.kind == ArgKind::BigImm
    }

    pub fn is_some_imm(&self) -> bool {
        self.is_imm() || self.is_big_imm()
    }

    pub fn is_addr(&self) -> bool {
        self.kind == ArgKind::Addr
    }

    pub fn is_stack(&self) -> bool {
        self.kind == ArgKind::Stack
    }

    pub fn is_memory(&self) -> bool {
        self.is_addr() || self.is_stack()
    }

    pub fn as_tmp(&self) -> Tmp {
        assert!(self.is_tmp());
        self.base
    }

    pub fn as_reg(&self) -> Reg {
        self.as_tmp().reg()
    }

    pub fn value(&self) -> i64 {
        assert!(self.is_some_imm());
        self.offset
    }

    pub fn offset(&self) -> i64 {
        assert!(self.is_memory());
        self.offset
    }

    pub fn base(&self) -> Tmp {
        assert!(self.is_addr());
        self.base
    }

    pub fn stack_slot(&self) -> StackSlotId {
        assert!(self.is_stack());
        self.slot
    }

    /// Bank of the value this operand carries when that can be told from the operand alone.
    /// Everything but an FP tmp is assumed to be GP.
    pub fn bank(&self) -> Bank {
        if self.is_fp_tmp() {
            Bank::FP
        } else {
            Bank::GP
        }
    }

    /// This is smart enough to know that an address operand in a Def role still only uses its
    /// base. For example `Move %tmp0, 8(%tmp1)` defs the memory at `8(%tmp1)` but uses `%tmp1`.
    pub fn for_each_tmp(
        &self,
        role: ArgRole,
        bank: Bank,
        width: Width,
        mut f: impl FnMut(Tmp, ArgRole, Bank, Width),
    ) {
        match self.kind {
            ArgKind::Tmp => f(self.base, role, bank, width),
            ArgKind::Addr => f(
                self.base,
                ArgRole::Use,
                Bank::GP,
                if role == ArgRole::UseAddr {
                    width
                } else {
                    Width::W64
                },
            ),
            _ => {}
        }
    }

    pub fn for_each_tmp_mut(
        &mut self,
        role: ArgRole,
        bank: Bank,
        width: Width,
        mut f: impl FnMut(&mut Tmp, ArgRole, Bank, Width),
    ) {
        match self.kind {
            ArgKind::Tmp => f(&mut self.base, role, bank, width),
            ArgKind::Addr => f(
                &mut self.base,
                ArgRole::Use,
                Bank::GP,
                if role == ArgRole::UseAddr {
                    width
                } else {
                    Width::W64
                },
            ),
            _ => {}
        }
    }

    pub fn for_each_tmp_fast(&self, mut f: impl FnMut(Tmp)) {
        if matches!(self.kind, ArgKind::Tmp | ArgKind::Addr) {
            f(self.base);
        }
    }

    pub fn for_each_tmp_fast_mut(&mut self, mut f: impl FnMut(&mut Tmp)) {
        if matches!(self.kind, ArgKind::Tmp | ArgKind::Addr) {
            f(&mut self.base);
        }
    }
}

impl From<Tmp> for Arg {
    fn from(tmp: Tmp) -> Self {
        Arg::tmp(tmp)
    }
}

impl std::fmt::Display for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ArgKind::Invalid => write!(f, "<invalid>"),
            ArgKind::Tmp => self.base.fmt(f),
            ArgKind::Imm => write!(f, "${}", self.offset),
            ArgKind::BigImm => write!(f, "${:#x}", self.offset),
            ArgKind::Addr => {
                if self.offset == 0 {
                    write!(f, "({})", self.base)
                } else {
                    write!(f, "{}({})", self.offset, self.base)
                }
            }
            ArgKind::Stack => {
                if self.offset != 0 {
                    write!(f, "{}", self.offset)?;
                }
                write!(f, "($stack{})", self.slot.0)
            }
        }
    }
}
