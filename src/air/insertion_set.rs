use crate::utils::insertion::execute_insertions;

use super::{arg::Arg, basic_block::BasicBlockId, code::Code, inst::Inst, opcode::Opcode};

pub type Insertion = crate::utils::insertion::Insertion<Inst>;

/// Batches instruction insertions into one block and applies them in a single pass, so that indices
/// recorded while walking the block stay valid until `execute`.
#[derive(Default)]
pub struct InsertionSet {
    insertions: Vec<Insertion>,
}

impl InsertionSet {
    pub fn new() -> Self {
        Self {
            insertions: Vec::new(),
        }
    }

    pub fn append_insertion(&mut self, insertion: Insertion) {
        self.insertions.push(insertion);
    }

    pub fn insert_inst(&mut self, index: usize, inst: Inst) {
        self.append_insertion(Insertion::new(index, inst))
    }

    pub fn insert(&mut self, index: usize, opcode: Opcode, args: &[Arg]) {
        self.insert_inst(index, Inst::new(opcode, args))
    }

    pub fn insert_insts(&mut self, index: usize, insts: impl IntoIterator<Item = Inst>) {
        for inst in insts.into_iter() {
            self.insert_inst(index, inst)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
    }

    pub fn execute(&mut self, code: &mut Code, block: BasicBlockId) -> usize {
        self.execute_on(&mut code.block_mut(block).insts)
    }

    pub fn execute_on(&mut self, insts: &mut Vec<Inst>) -> usize {
        execute_insertions(insts, &mut self.insertions)
    }
}
