use super::{code::Code, insertion_set::InsertionSet, inst::Inst, opcode::Opcode};

/// Because there may be terminals that produce values, the register allocator may want to spill
/// those terminals. It'll happen to spill it after the terminal. If we left the graph in this
/// state, it'd be invalid because a terminal must be the last instruction in a block.
/// We fix that here.
pub fn fix_spills_after_terminals(code: &mut Code) {
    let mut insertion_set = InsertionSet::new();
    let mut changed = false;

    for block_id in code.indices().collect::<Vec<_>>() {
        let block = code.block(block_id);
        let Some(terminal_index) = block.insts.iter().rposition(|inst| inst.is_terminal()) else {
            continue;
        };

        if terminal_index == block.insts.len() - 1 {
            continue;
        }

        let insts_to_move = block.insts[terminal_index + 1..].to_vec();
        log::trace!(
            "moving {} instructions after the terminal of {}",
            insts_to_move.len(),
            block_id
        );

        for i in 0..code.block(block_id).successors.len() {
            let (successor, frequency) = code.block(block_id).successors[i];

            // If successor's only predecessor is block, we can plant the spill inside the
            // successor. Otherwise, we must split the critical edge and create a new block for
            // the spill.
            if code.block(successor).predecessors.len() == 1 {
                insertion_set.insert_insts(0, insts_to_move.iter().cloned());
                insertion_set.execute(code, successor);
            } else {
                let new_block = code.add_block(code.block(successor).frequency);
                for inst in insts_to_move.iter().cloned() {
                    code.append(new_block, inst);
                }
                code.append(new_block, Inst::new(Opcode::Jump, &[]));
                code.block_mut(new_block).successors.push((successor, frequency));
                code.block_mut(block_id).successors[i].0 = new_block;
                changed = true;
            }
        }

        code.block_mut(block_id).insts.truncate(terminal_index + 1);
    }

    if changed {
        code.reset_reachability();
    }
}
