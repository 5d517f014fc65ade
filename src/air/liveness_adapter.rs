use tinyvec::TinyVec;

use crate::{
    bank::Bank,
    liveness::{Liveness, LivenessAdapter},
};

use super::{basic_block::BasicBlockId, code::Code, tmp::Tmp};

type ActionsList = TinyVec<[usize; 4]>;

#[derive(Clone, Debug, Default)]
pub struct Actions {
    pub def: ActionsList,
    pub use_: ActionsList,
}

pub type ActionsForBoundary = Vec<Actions>;

/// Liveness of the tmps (registers included) of one bank.
pub struct TmpLivenessAdapter<'a> {
    code: &'a Code,
    bank: Bank,
    actions: Vec<ActionsForBoundary>,
}

pub type TmpLiveness<'a> = Liveness<TmpLivenessAdapter<'a>>;

impl<'a> TmpLivenessAdapter<'a> {
    pub fn new(code: &'a Code, bank: Bank) -> Self {
        Self {
            code,
            bank,
            actions: vec![ActionsForBoundary::new(); code.blocks.len()],
        }
    }

    pub fn accepts_bank(&self, bank: Bank) -> bool {
        bank == self.bank
    }

    pub fn actions_at(&self, block: BasicBlockId, boundary: usize) -> &Actions {
        &self.actions[block.0][boundary]
    }
}

pub fn compute_tmp_liveness(code: &Code, bank: Bank) -> TmpLiveness<'_> {
    Liveness::compute(TmpLivenessAdapter::new(code, bank))
}

fn add_if_not_contains(list: &mut ActionsList, index: usize) {
    if !list.contains(&index) {
        list.push(index);
    }
}

impl<'a> LivenessAdapter for TmpLivenessAdapter<'a> {
    type Thing = Tmp;

    fn num_blocks(&self) -> usize {
        self.code.blocks.len()
    }

    fn predecessors(&self, block: BasicBlockId) -> &[BasicBlockId] {
        &self.code.block(block).predecessors
    }

    fn block_size(&self, block: BasicBlockId) -> usize {
        self.code.block(block).insts.len()
    }

    fn num_indices(&self) -> usize {
        Tmp::absolute_index_for_tmp_count(self.code.num_tmps(self.bank))
    }

    fn value_to_index(&self, thing: Tmp) -> usize {
        thing.absolute_index()
    }

    fn index_to_value(&self, index: usize) -> Tmp {
        Tmp::tmp_for_absolute_index(self.bank, index)
    }

    fn for_each_def<F>(&self, block: BasicBlockId, value_boundary_index: usize, mut func: F)
    where
        F: FnMut(Tmp),
    {
        for index in self.actions_at(block, value_boundary_index).def.iter() {
            func(self.index_to_value(*index));
        }
    }

    fn for_each_use<F>(&self, block: BasicBlockId, value_boundary_index: usize, mut func: F)
    where
        F: FnMut(Tmp),
    {
        for index in self.actions_at(block, value_boundary_index).use_.iter() {
            func(self.index_to_value(*index));
        }
    }

    fn prepare_to_compute(&mut self) {
        let code = self.code;
        let bank = self.bank;

        for block in code.indices() {
            let actions_for_boundary = &mut self.actions[block.0];
            actions_for_boundary.clear();
            actions_for_boundary.resize(code.block(block).insts.len() + 1, Actions::default());

            for (inst_index, inst) in code.block(block).insts.iter().enumerate() {
                inst.for_each_tmp(|thing, role, arg_bank, _width| {
                    if arg_bank != bank {
                        return;
                    }

                    let index = thing.absolute_index();

                    if role.is_early_use() {
                        add_if_not_contains(&mut actions_for_boundary[inst_index].use_, index);
                    }
                    if role.is_early_def() {
                        add_if_not_contains(&mut actions_for_boundary[inst_index].def, index);
                    }
                    if role.is_late_use() {
                        add_if_not_contains(&mut actions_for_boundary[inst_index + 1].use_, index);
                    }
                    if role.is_late_def() {
                        add_if_not_contains(&mut actions_for_boundary[inst_index + 1].def, index);
                    }
                });
            }
        }
    }
}
