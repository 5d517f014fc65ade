use crate::{bank::Bank, utils::bitvector::BitVector};

use super::{basic_block::Frequency, code::Code, opcode::Opcode, tmp::Tmp};

/// Scale applied to blocks that can only be reached through rare edges.
pub const RARE_BLOCK_PENALTY: f64 = 0.001;

#[derive(Debug, Clone, Default)]
struct BankCounts {
    num_warm_uses_and_defs: Vec<f32>,
    num_defs: Vec<u32>,
    num_const_defs: Vec<u32>,
    constants: Vec<i64>,
}

impl BankCounts {
    fn new(size: usize) -> Self {
        Self {
            num_warm_uses_and_defs: vec![0.0; size],
            num_defs: vec![0; size],
            num_const_defs: vec![0; size],
            constants: vec![0; size],
        }
    }
}

/// Computes the number of uses of a tmp based on frequency of execution. The frequency of blocks
/// that are only reachable by rare edges is scaled by [`RARE_BLOCK_PENALTY`].
///
/// Counts are taken once, before allocation starts. Tmps created later (spill tmps) are reported
/// as having no uses and no constant def.
pub struct UseCounts {
    banks: [BankCounts; 2],
}

impl UseCounts {
    pub fn new(code: &Code) -> Self {
        let mut fast_blocks = BitVector::with_capacity(code.blocks.len());
        if !code.blocks.is_empty() {
            let mut worklist = vec![0usize];
            fast_blocks.set(0, true);
            while let Some(block) = worklist.pop() {
                for &(succ, frequency) in code.blocks[block].successors.iter() {
                    if frequency != Frequency::Rare && !fast_blocks.set(succ.0, true) {
                        worklist.push(succ.0);
                    }
                }
            }
        }

        let mut banks = [
            BankCounts::new(Tmp::absolute_index_for_tmp_count(code.num_tmps(Bank::GP))),
            BankCounts::new(Tmp::absolute_index_for_tmp_count(code.num_tmps(Bank::FP))),
        ];

        for block in code.blocks.iter() {
            let mut frequency = block.frequency;
            if !fast_blocks.get(block.index) {
                frequency *= RARE_BLOCK_PENALTY;
            }

            for inst in block.insts.iter() {
                inst.for_each_tmp(|tmp, role, bank, _| {
                    let counts = &mut banks[bank.index()];
                    let index = tmp.absolute_index();
                    if role.is_warm_use() || role.is_any_def() {
                        counts.num_warm_uses_and_defs[index] += frequency as f32;
                    }
                    if role.is_any_def() {
                        counts.num_defs[index] += 1;
                    }
                });

                if (inst.opcode == Opcode::Move || inst.opcode == Opcode::Move32)
                    && inst.args[0].is_some_imm()
                    && inst.args[1].is_tmp()
                {
                    let tmp = inst.args[1].as_tmp();
                    let counts = &mut banks[tmp.bank().index()];
                    let index = tmp.absolute_index();
                    // Move32 zero extends its immediate.
                    let value = match inst.opcode {
                        Opcode::Move32 => inst.args[0].value() as u32 as i64,
                        _ => inst.args[0].value(),
                    };

                    if counts.num_const_defs[index] == 0 || counts.constants[index] == value {
                        counts.constants[index] = value;
                        counts.num_const_defs[index] += 1;
                    }
                }
            }
        }

        Self { banks }
    }

    pub fn num_warm_uses_and_defs(&self, bank: Bank, absolute_index: usize) -> f32 {
        self.banks[bank.index()]
            .num_warm_uses_and_defs
            .get(absolute_index)
            .copied()
            .unwrap_or(0.0)
    }

    /// True if every def of the tmp materializes the same immediate.
    pub fn is_const_def(&self, bank: Bank, absolute_index: usize) -> bool {
        let counts = &self.banks[bank.index()];
        match (
            counts.num_defs.get(absolute_index),
            counts.num_const_defs.get(absolute_index),
        ) {
            (Some(&defs), Some(&const_defs)) => defs != 0 && defs == const_defs,
            _ => false,
        }
    }

    pub fn constant(&self, bank: Bank, absolute_index: usize) -> i64 {
        assert!(self.is_const_def(bank, absolute_index));
        self.banks[bank.index()].constants[absolute_index]
    }
}
