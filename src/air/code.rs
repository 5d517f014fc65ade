use indexmap::IndexSet;
use tinyvec::TinyVec;

use crate::{
    bank::{for_each_bank, Bank},
    error::{AirError, Result},
    jit::{reg::Reg, register_set::RegisterSet},
    options::Options,
};

use super::{
    arg::ArgKind,
    basic_block::{update_predecessors_after, BasicBlock, BasicBlockId, Frequency},
    inst::Inst,
    stack_slot::{StackSlot, StackSlotId, StackSlotKind},
    tmp::Tmp,
};

/// Number of registers per bank handed to the allocator unless the client says otherwise.
pub const DEFAULT_NUMBER_OF_ALLOCATABLE_REGISTERS: u8 = 16;

/// This is an IR that is very close to the bare metal: instructions over registers, temporaries,
/// immediates and memory, grouped into basic blocks. Block 0 is the entrypoint.
pub struct Code {
    pub gp_regs_in_priority_order: Vec<Reg>,
    pub fp_regs_in_priority_order: Vec<Reg>,
    pub pinned_regs: RegisterSet,
    pub fast_tmps: IndexSet<Tmp>,
    pub num_gp_tmps: usize,
    pub num_fp_tmps: usize,
    pub blocks: Vec<BasicBlock>,
    pub stack_slots: Vec<StackSlot>,
    pub options: Options,
}

impl Default for Code {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

impl Code {
    pub fn new(options: Options) -> Self {
        let mut this = Self {
            gp_regs_in_priority_order: vec![],
            fp_regs_in_priority_order: vec![],
            pinned_regs: RegisterSet::new(),
            fast_tmps: IndexSet::new(),
            num_gp_tmps: 0,
            num_fp_tmps: 0,
            blocks: Vec::new(),
            stack_slots: Vec::new(),
            options,
        };

        for_each_bank(|bank| {
            let regs = (0..DEFAULT_NUMBER_OF_ALLOCATABLE_REGISTERS)
                .map(|n| match bank {
                    Bank::GP => Reg::new_gpr(n),
                    Bank::FP => Reg::new_fpr(n),
                })
                .collect::<Vec<_>>();
            this.set_regs_in_priority_order(bank, &regs);
        });

        this
    }

    pub fn set_regs_in_priority_order(&mut self, bank: Bank, regs: &[Reg]) {
        let regs_in_priority_impl = match bank {
            Bank::GP => &mut self.gp_regs_in_priority_order,
            Bank::FP => &mut self.fp_regs_in_priority_order,
        };
        *regs_in_priority_impl = regs.to_vec();
    }

    pub fn regs_in_priority_order(&self, bank: Bank) -> &[Reg] {
        match bank {
            Bank::GP => &self.gp_regs_in_priority_order,
            Bank::FP => &self.fp_regs_in_priority_order,
        }
    }

    /// Reserves `reg` for the client. It is no longer handed out, but the allocator still knows
    /// that any def interferes with it.
    pub fn pin_register(&mut self, reg: Reg) {
        self.pinned_regs.add(reg, reg.conservative_width());
        self.gp_regs_in_priority_order.retain(|r| *r != reg);
        self.fp_regs_in_priority_order.retain(|r| *r != reg);
    }

    pub fn is_pinned(&self, reg: Reg) -> bool {
        self.pinned_regs.contains(reg)
    }

    /// Marks a tmp that must end up in a register.
    pub fn add_fast_tmp(&mut self, tmp: Tmp) {
        self.fast_tmps.insert(tmp);
    }

    pub fn is_fast_tmp(&self, tmp: Tmp) -> bool {
        self.fast_tmps.contains(&tmp)
    }

    pub fn num_tmps(&self, bank: Bank) -> usize {
        match bank {
            Bank::GP => self.num_gp_tmps,
            Bank::FP => self.num_fp_tmps,
        }
    }

    pub fn new_tmp(&mut self, bank: Bank) -> Tmp {
        match bank {
            Bank::GP => {
                self.num_gp_tmps += 1;
                Tmp::gp_tmp_for_index(self.num_gp_tmps - 1)
            }
            Bank::FP => {
                self.num_fp_tmps += 1;
                Tmp::fp_tmp_for_index(self.num_fp_tmps - 1)
            }
        }
    }

    pub fn indices(&self) -> impl Iterator<Item = BasicBlockId> {
        (0..self.blocks.len()).map(BasicBlockId)
    }

    pub fn block(&self, id: BasicBlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BasicBlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0]
    }

    pub fn add_block(&mut self, frequency: f64) -> BasicBlockId {
        let id = BasicBlockId(self.blocks.len());
        self.blocks.push(BasicBlock {
            index: id.0,
            insts: Vec::new(),
            successors: TinyVec::new(),
            predecessors: TinyVec::new(),
            frequency,
        });
        id
    }

    /// Adds a control flow edge. Predecessors are kept up to date incrementally.
    pub fn add_edge(&mut self, from: BasicBlockId, to: BasicBlockId, frequency: Frequency) {
        self.block_mut(from).successors.push((to, frequency));
        if to.0 < self.blocks.len() && !self.block(to).predecessors.contains(&from) {
            self.block_mut(to).predecessors.push(from);
        }
    }

    pub fn append(&mut self, block: BasicBlockId, inst: Inst) {
        self.block_mut(block).insts.push(inst);
    }

    pub fn stack_slot(&self, id: StackSlotId) -> &StackSlot {
        &self.stack_slots[id.0]
    }

    pub fn stack_slot_mut(&mut self, id: StackSlotId) -> &mut StackSlot {
        &mut self.stack_slots[id.0]
    }

    pub fn add_stack_slot(&mut self, byte_size: u32, kind: StackSlotKind) -> StackSlotId {
        let id = StackSlotId(self.stack_slots.len());
        self.stack_slots.push(StackSlot {
            byte_size,
            kind,
            index: id.0,
            offset_from_fp: 0,
        });
        id
    }

    pub fn clear_predecessors(&mut self) {
        for block in self.blocks.iter_mut() {
            block.predecessors.clear();
        }
    }

    pub fn reset_reachability(&mut self) {
        self.clear_predecessors();
        if !self.blocks.is_empty() {
            update_predecessors_after(BasicBlockId(0), self);
        }
    }

    /// Checks that the procedure is well formed enough to be allocated.
    pub fn validate(&self) -> Result<()> {
        for bank in [Bank::GP, Bank::FP] {
            let mut seen = RegisterSet::new();
            for &reg in self.regs_in_priority_order(bank) {
                if reg.bank() != bank {
                    return Err(AirError::RegisterBankMismatch { reg, bank });
                }
                if seen.contains(reg) {
                    return Err(AirError::DuplicateRegister { reg, bank });
                }
                seen.add(reg, reg.conservative_width());
            }

            if self.num_tmps(bank) != 0 && self.regs_in_priority_order(bank).is_empty() {
                return Err(AirError::NoRegisters { bank });
            }
        }

        for block in self.blocks.iter() {
            let id = block.id();
            for &(successor, _) in block.successors.iter() {
                if successor.0 >= self.blocks.len() {
                    return Err(AirError::UnknownSuccessor {
                        block: id,
                        successor,
                    });
                }
            }

            match block.insts.last() {
                Some(inst) if inst.is_terminal() => {}
                _ => return Err(AirError::MissingTerminal { block: id }),
            }

            for (index, inst) in block.insts.iter().enumerate() {
                if inst.is_terminal() && index + 1 != block.insts.len() {
                    return Err(AirError::TerminalNotAtEnd { block: id, index });
                }

                if !inst.opcode.is_valid_form(inst.args.len()) {
                    return Err(AirError::InvalidForm {
                        block: id,
                        index,
                        opcode: inst.opcode,
                        num_args: inst.args.len(),
                    });
                }

                for (operand, arg) in inst.args.iter().enumerate() {
                    self.validate_operand(inst, id, index, operand, arg.kind())?;
                }
            }
        }

        Ok(())
    }

    fn validate_operand(
        &self,
        inst: &Inst,
        block: BasicBlockId,
        index: usize,
        operand: usize,
        kind: ArgKind,
    ) -> Result<()> {
        let arg = &inst.args[operand];
        match kind {
            ArgKind::Invalid => Err(AirError::InvalidOperand {
                block,
                index,
                operand,
            }),
            ArgKind::Stack => {
                if arg.stack_slot().0 >= self.stack_slots.len() {
                    return Err(AirError::UnknownStackSlot {
                        index: arg.stack_slot().0,
                    });
                }
                Ok(())
            }
            ArgKind::Tmp => {
                let tmp = arg.as_tmp();
                let (_, expected, _) = inst.form_at(operand);
                if tmp.bank() != expected {
                    return Err(AirError::BankMismatch {
                        block,
                        index,
                        operand,
                        expected,
                        found: tmp.bank(),
                    });
                }
                self.validate_tmp(tmp)
            }
            ArgKind::Addr => self.validate_tmp(arg.base()),
            ArgKind::Imm | ArgKind::BigImm => Ok(()),
        }
    }

    fn validate_tmp(&self, tmp: Tmp) -> Result<()> {
        if tmp.is_reg() {
            return Ok(());
        }
        let bank = tmp.bank();
        let num_tmps = self.num_tmps(bank);
        if tmp.tmp_index() >= num_tmps {
            return Err(AirError::UnknownTmp {
                tmp,
                bank,
                num_tmps,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for block in self.blocks.iter() {
            writeln!(f, "BB{}: ; frequency = {}", block.index, block.frequency)?;
            if !block.predecessors.is_empty() {
                write!(f, "  Predecessors: ")?;

                for (i, pred) in block.predecessors.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", pred)?;
                }

                writeln!(f)?;
            }

            for inst in block.insts.iter() {
                writeln!(f, "    {}", inst)?;
            }

            if !block.successors.is_empty() {
                write!(f, "  Successors: ")?;

                for (i, (succ, frequency)) in block.successors.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", succ)?;
                    if *frequency == Frequency::Rare {
                        write!(f, " (rare)")?;
                    }
                }

                writeln!(f)?;
            }
        }

        for slot in self.stack_slots.iter() {
            writeln!(f, "{}", slot)?;
        }

        Ok(())
    }
}
