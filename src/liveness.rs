//! Generic backward liveness over basic blocks.
//!
//! The adapter describes, for every boundary between two instructions of a block, which things
//! are used and which are defined there. Boundary `i` sits right before instruction `i`, so an
//! instruction's early actions happen at its own index and its late actions at the next one.

use std::fmt::Debug;

use indexmap::IndexSet;

use crate::air::basic_block::BasicBlockId;

pub trait LivenessAdapter {
    type Thing: Copy + Eq + Debug;

    fn num_blocks(&self) -> usize;
    fn predecessors(&self, block: BasicBlockId) -> &[BasicBlockId];
    fn block_size(&self, block: BasicBlockId) -> usize;

    /// Called once before the fixpoint runs.
    fn prepare_to_compute(&mut self);

    fn num_indices(&self) -> usize;
    fn value_to_index(&self, thing: Self::Thing) -> usize;
    fn index_to_value(&self, index: usize) -> Self::Thing;

    fn for_each_use<F>(&self, block: BasicBlockId, value_boundary_index: usize, func: F)
    where
        F: FnMut(Self::Thing);

    fn for_each_def<F>(&self, block: BasicBlockId, value_boundary_index: usize, func: F)
    where
        F: FnMut(Self::Thing);
}

pub struct Liveness<A: LivenessAdapter> {
    pub adapter: A,
    workset: IndexSparseSet,
    live_at_head: Vec<Vec<usize>>,
    live_at_tail: Vec<Vec<usize>>,
}

impl<A: LivenessAdapter> Liveness<A> {
    pub fn new(adapter: A) -> Self {
        let num_blocks = adapter.num_blocks();
        Liveness {
            workset: IndexSparseSet::new(adapter.num_indices()),
            adapter,
            live_at_head: vec![Vec::new(); num_blocks],
            live_at_tail: vec![Vec::new(); num_blocks],
        }
    }

    /// Builds the adapter's actions and runs the dataflow to a fixpoint.
    pub fn compute(adapter: A) -> Self {
        let mut this = Self::new(adapter);
        this.run();
        this
    }

    pub fn live_at_head(&self, block: BasicBlockId) -> impl Iterator<Item = A::Thing> + '_ {
        self.live_at_head[block.0]
            .iter()
            .map(move |&index| self.adapter.index_to_value(index))
    }

    pub fn live_at_tail(&self, block: BasicBlockId) -> impl Iterator<Item = A::Thing> + '_ {
        self.live_at_tail[block.0]
            .iter()
            .map(move |&index| self.adapter.index_to_value(index))
    }

    pub fn is_live_at_head(&self, block: BasicBlockId, thing: A::Thing) -> bool {
        self.live_at_head[block.0].contains(&self.adapter.value_to_index(thing))
    }

    pub fn local_calc(&mut self, block: BasicBlockId) -> LocalCalc<'_, A> {
        LocalCalc::new(self, block)
    }

    fn run(&mut self) {
        self.adapter.prepare_to_compute();
        let num_blocks = self.adapter.num_blocks();

        // Late uses of a block's last instruction are live at its tail.
        for block_index in (0..num_blocks).rev() {
            let block = BasicBlockId(block_index);
            let mut live_at_tail = Vec::new();
            self.adapter
                .for_each_use(block, self.adapter.block_size(block), |thing| {
                    live_at_tail.push(self.adapter.value_to_index(thing));
                });
            live_at_tail.sort_unstable();
            live_at_tail.dedup();
            self.live_at_tail[block_index] = live_at_tail;
        }

        let mut dirty_blocks = (0..num_blocks).rev().collect::<IndexSet<usize>>();
        let mut merge_buffer = Vec::new();

        loop {
            let mut changed = false;

            for block_index in (0..num_blocks).rev() {
                if !dirty_blocks.swap_remove(&block_index) {
                    continue;
                }
                let block = BasicBlockId(block_index);

                {
                    let mut local_calc = LocalCalc::new(self, block);
                    for inst_index in (0..local_calc.liveness.adapter.block_size(block)).rev() {
                        local_calc.execute(inst_index);
                    }
                }

                let adapter = &self.adapter;
                let workset = &mut self.workset;
                adapter.for_each_def(block, 0, |thing| {
                    workset.remove(adapter.value_to_index(thing));
                });

                // Only what became live since the last visit needs to flow to the predecessors.
                let live_at_head = &mut self.live_at_head[block_index];
                for index in live_at_head.iter() {
                    workset.remove(*index);
                }

                if workset.is_empty() {
                    continue;
                }

                workset.sort();
                live_at_head.extend(workset.iter());
                live_at_head.sort_unstable();

                for &predecessor in adapter.predecessors(block) {
                    let live_at_tail = &mut self.live_at_tail[predecessor.0];

                    merge_buffer.clear();
                    merge_deduplicated_sorted(
                        live_at_tail.iter().copied(),
                        workset.iter(),
                        &mut merge_buffer,
                    );

                    if merge_buffer.len() == live_at_tail.len() {
                        continue;
                    }

                    std::mem::swap(live_at_tail, &mut merge_buffer);
                    dirty_blocks.insert(predecessor.0);
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }
    }
}

/// Walks a block backwards, keeping the set of things live at the current boundary.
pub struct LocalCalc<'a, A: LivenessAdapter> {
    liveness: &'a mut Liveness<A>,
    block: BasicBlockId,
}

impl<'a, A: LivenessAdapter> LocalCalc<'a, A> {
    pub fn new(liveness: &'a mut Liveness<A>, block: BasicBlockId) -> Self {
        let Liveness {
            workset,
            live_at_tail,
            ..
        } = &mut *liveness;
        workset.clear();
        for &index in live_at_tail[block.0].iter() {
            workset.add(index);
        }
        LocalCalc { liveness, block }
    }

    pub fn is_live(&self, thing: A::Thing) -> bool {
        self.liveness
            .workset
            .contains(self.liveness.adapter.value_to_index(thing))
    }

    pub fn live(&self) -> impl Iterator<Item = A::Thing> + '_ {
        self.liveness
            .workset
            .iter()
            .map(move |index| self.liveness.adapter.index_to_value(index))
    }

    /// Moves the current boundary from after instruction `inst_index` to before it.
    pub fn execute(&mut self, inst_index: usize) {
        let Liveness {
            adapter, workset, ..
        } = &mut *self.liveness;
        let adapter = &*adapter;

        adapter.for_each_def(self.block, inst_index + 1, |thing| {
            workset.remove(adapter.value_to_index(thing));
        });

        adapter.for_each_use(self.block, inst_index, |thing| {
            workset.add(adapter.value_to_index(thing));
        });
    }
}

/// IndexSparseSet is an efficient set of integers that can only be valued
/// between zero and size() - 1.
///
/// The implementation is using Briggs Sparse Set representation. We allocate
/// memory from 0 to size() - 1 to do mapping in O(1), but we never need to clear
/// that memory. When adding/removing values to the set, they are added in a list
/// and the corresponding bucket is initialized to the position in the list.
#[derive(Debug, Clone)]
pub struct IndexSparseSet {
    map: Vec<usize>,
    values: Vec<usize>,
}

impl IndexSparseSet {
    pub fn new(size: usize) -> Self {
        IndexSparseSet {
            map: vec![0; size],
            values: Vec::new(),
        }
    }

    pub fn contains(&self, value: usize) -> bool {
        match self.map.get(value) {
            Some(&position) => self.values.get(position) == Some(&value),
            None => false,
        }
    }

    pub fn add(&mut self, value: usize) -> bool {
        if self.contains(value) {
            return false;
        }
        self.values.push(value);
        self.map[value] = self.values.len() - 1;
        true
    }

    pub fn remove(&mut self, value: usize) -> bool {
        if !self.contains(value) {
            return false;
        }
        let position = self.map[value];
        let last_value = self.values[self.values.len() - 1];
        self.values[position] = last_value;
        self.map[last_value] = position;
        self.values.pop();
        true
    }

    pub fn sort(&mut self) {
        self.values.sort_unstable();
        for (position, &value) in self.values.iter().enumerate() {
            self.map[value] = position;
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.values.iter().copied()
    }
}

fn merge_deduplicated_sorted<T: Copy + Ord>(
    left: impl Iterator<Item = T>,
    right: impl Iterator<Item = T>,
    dst: &mut Vec<T>,
) {
    let mut left = left.peekable();
    let mut right = right.peekable();

    loop {
        let next = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) if l < r => left.next(),
            (Some(l), Some(r)) if l > r => right.next(),
            (Some(_), Some(_)) => {
                right.next();
                left.next()
            }
            (Some(_), None) => left.next(),
            (None, Some(_)) => right.next(),
            (None, None) => break,
        };
        dst.extend(next);
    }
}
