use tinyvec::TinyVec;

use crate::{
    bank::Bank,
    jit::register_set::{PreservedWidth, RegisterSet},
    width::Width,
};

use super::{
    arg::{Arg, ArgRole},
    opcode::Opcode,
    tmp::Tmp,
};

#[derive(Clone, PartialEq, Eq, Default)]
pub struct Inst {
    pub opcode: Opcode,
    pub args: TinyVec<[Arg; 3]>,
    /// Registers clobbered after the instruction's late uses. Only calls carry these.
    pub extra_clobbered_regs: RegisterSet,
    /// Registers clobbered before the instruction's early uses.
    pub extra_early_clobbered_regs: RegisterSet,
}

impl Inst {
    pub fn new(opcode: Opcode, arguments: &[Arg]) -> Self {
        Inst {
            opcode,
            args: arguments.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn call(arguments: &[Arg], clobbered: RegisterSet, early_clobbered: RegisterSet) -> Self {
        Inst {
            opcode: Opcode::Call,
            args: arguments.iter().copied().collect(),
            extra_clobbered_regs: clobbered,
            extra_early_clobbered_regs: early_clobbered,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.opcode.is_terminal()
    }

    /// Role, bank and width of the operand at `index`.
    pub fn form_at(&self, index: usize) -> (ArgRole, Bank, Width) {
        if self.opcode == Opcode::Call {
            if index == 0 {
                return (ArgRole::Use, Bank::GP, Width::W64);
            }
            return (ArgRole::ColdUse, self.args[index].bank(), Width::W64);
        }

        let form = self
            .opcode
            .form(self.args.len())
            .unwrap_or_else(|| panic!("no form for {}", self));
        form[index]
    }

    pub fn for_each_arg<F>(&self, mut f: F)
    where
        F: FnMut(&Arg, ArgRole, Bank, Width),
    {
        for i in 0..self.args.len() {
            let (role, bank, width) = self.form_at(i);
            f(&self.args[i], role, bank, width);
        }
    }

    pub fn for_each_arg_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Arg, ArgRole, Bank, Width),
    {
        for i in 0..self.args.len() {
            let (role, bank, width) = self.form_at(i);
            f(&mut self.args[i], role, bank, width);
        }
    }

    pub fn for_each_tmp(&self, mut f: impl FnMut(Tmp, ArgRole, Bank, Width)) {
        self.for_each_arg(|arg, role, bank, width| arg.for_each_tmp(role, bank, width, &mut f))
    }

    pub fn for_each_tmp_mut(&mut self, mut f: impl FnMut(&mut Tmp, ArgRole, Bank, Width)) {
        self.for_each_arg_mut(|arg, role, bank, width| {
            arg.for_each_tmp_mut(role, bank, width, &mut f)
        })
    }

    pub fn for_each_tmp_fast(&self, mut f: impl FnMut(Tmp)) {
        for arg in self.args.iter() {
            arg.for_each_tmp_fast(&mut f);
        }
    }

    pub fn for_each_tmp_fast_mut(&mut self, mut f: impl FnMut(&mut Tmp)) {
        for arg in self.args.iter_mut() {
            arg.for_each_tmp_fast_mut(&mut f);
        }
    }

    /// Whether the operand at `index` may be replaced by a stack slot without changing the opcode.
    pub fn admits_stack(&self, index: usize) -> bool {
        let other_is_memory = |other: usize| {
            self.args
                .get(other)
                .map(|arg| arg.is_memory())
                .unwrap_or(false)
        };

        match self.opcode {
            op if op.is_move() => match self.args.len() {
                2 => !other_is_memory(index ^ 1),
                3 => index < 2,
                _ => false,
            },
            op if op.is_two_operand_arith() => match self.args.len() {
                2 => !other_is_memory(index ^ 1),
                3 => index == 0,
                _ => false,
            },
            Opcode::Compare64 => index == 0,
            Opcode::Call => index >= 1,
            _ => false,
        }
    }

    /// For three-operand commutative arithmetic, the index of the def that may share a register
    /// with either source.
    pub fn should_try_aliasing_def(&self) -> Option<usize> {
        if self.opcode.is_commutative() && self.args.len() == 3 {
            Some(2)
        } else {
            None
        }
    }

    pub fn has_late_use_or_def(&self) -> bool {
        if !self.extra_clobbered_regs.is_empty() {
            return true;
        }
        let mut result = false;
        self.for_each_arg(|_, role, _, _| {
            result |= role.is_late_use() || role.is_late_def();
        });
        result
    }

    pub fn has_early_def(&self) -> bool {
        if !self.extra_early_clobbered_regs.is_empty() {
            return true;
        }
        let mut result = false;
        self.for_each_arg(|_, role, _, _| {
            result |= role.is_early_def();
        });
        result
    }

    pub fn needs_padding(prev: &Self, next: &Self) -> bool {
        prev.has_late_use_or_def() && next.has_early_def()
    }

    /// Tmps defined at the boundary between `prev` and `next`: the late defs of `prev` and the early
    /// defs of `next`.
    pub fn for_each_def(
        prev: Option<&Inst>,
        next: Option<&Inst>,
        mut f: impl FnMut(Tmp, ArgRole, Bank, Width),
    ) {
        if let Some(prev) = prev {
            prev.for_each_tmp(|tmp, role, bank, width| {
                if role.is_late_def() {
                    f(tmp, role, bank, width);
                }
            });
        }

        if let Some(next) = next {
            next.for_each_tmp(|tmp, role, bank, width| {
                if role.is_early_def() {
                    f(tmp, role, bank, width);
                }
            });
        }
    }

    /// Like [`Inst::for_each_def`], plus the registers clobbered at that boundary, with how much of
    /// each clobbered register survives.
    pub fn for_each_def_with_extra_clobbered_regs(
        prev: Option<&Inst>,
        next: Option<&Inst>,
        mut f: impl FnMut(Tmp, ArgRole, Bank, Width, PreservedWidth),
    ) {
        Self::for_each_def(prev, next, |tmp, role, bank, width| {
            f(tmp, role, bank, width, PreservedWidth::PreservesNothing)
        });

        if let Some(prev) = prev {
            prev.extra_clobbered_regs
                .for_each_with_width_and_preserved(|reg, width, preserved| {
                    f(Tmp::from_reg(reg), ArgRole::Def, reg.bank(), width, preserved)
                });
        }

        if let Some(next) = next {
            next.extra_early_clobbered_regs
                .for_each_with_width_and_preserved(|reg, width, preserved| {
                    f(Tmp::from_reg(reg), ArgRole::EarlyDef, reg.bank(), width, preserved)
                });
        }
    }
}

impl std::fmt::Display for Inst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", arg)?;
            } else {
                write!(f, ", {}", arg)?;
            }
        }
        if !self.extra_clobbered_regs.is_empty() {
            write!(f, " clobbers {}", self.extra_clobbered_regs)?;
        }
        if !self.extra_early_clobbered_regs.is_empty() {
            write!(f, " early-clobbers {}", self.extra_early_clobbered_regs)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Inst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}
