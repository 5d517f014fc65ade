use std::ops::{Deref, DerefMut};

use tinyvec::TinyVec;

use super::{code::Code, inst::Inst};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Frequency {
    /// No hypothesis about how often this edge is taken. The block frequency still applies.
    #[default]
    Normal,
    /// The edge is expected to be taken super rarely, and code only reachable through rare edges
    /// may be punished.
    Rare,
}

#[derive(Clone)]
pub struct BasicBlock {
    pub index: usize,
    pub insts: Vec<Inst>,
    pub successors: TinyVec<[(BasicBlockId, Frequency); 2]>,
    pub predecessors: TinyVec<[BasicBlockId; 2]>,
    pub frequency: f64,
}

impl BasicBlock {
    pub fn id(&self) -> BasicBlockId {
        BasicBlockId(self.index)
    }

    pub fn successor_blocks(&self) -> impl Iterator<Item = BasicBlockId> + '_ {
        self.successors.iter().map(|(block, _)| *block)
    }
}

impl Deref for BasicBlock {
    type Target = Vec<Inst>;

    fn deref(&self) -> &Self::Target {
        &self.insts
    }
}

impl DerefMut for BasicBlock {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.insts
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct BasicBlockId(pub usize);

impl Default for BasicBlockId {
    fn default() -> Self {
        Self(usize::MAX)
    }
}

impl From<usize> for BasicBlockId {
    fn from(index: usize) -> Self {
        BasicBlockId(index)
    }
}

impl From<BasicBlockId> for usize {
    fn from(id: BasicBlockId) -> Self {
        id.0
    }
}

impl std::fmt::Display for BasicBlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BB{}", self.0)
    }
}

pub fn update_predecessors_after(root: BasicBlockId, code: &mut Code) {
    let mut worklist = TinyVec::<[BasicBlockId; 16]>::new();

    worklist.push(root);

    while let Some(block) = worklist.pop() {
        for i in 0..code.block(block).successors.len() {
            let succ = code.block(block).successors[i].0;

            if !code.block(succ).predecessors.contains(&block) {
                code.block_mut(succ).predecessors.push(block);
                worklist.push(succ);
            }
        }
    }
}
