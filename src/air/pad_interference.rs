use super::{code::Code, insertion_set::InsertionSet, inst::Inst, opcode::Opcode};

/// Air reasons about liveness by reasoning about interference at boundaries between instructions.
/// That works for early uses and late defs, but a late use or def in one instruction followed by
/// an early def in the next would be seen as interfering at one boundary when they do not, or as
/// dead when they are not. Putting a `Nop` between such pairs gives each side its own boundary.
pub fn pad_interference(code: &mut Code) {
    let mut insertion_set = InsertionSet::new();

    for block in code.indices() {
        let insts = &code.block(block).insts;
        for inst_index in 1..insts.len() {
            if Inst::needs_padding(&insts[inst_index - 1], &insts[inst_index]) {
                insertion_set.insert(inst_index, Opcode::Nop, &[]);
            }
        }

        insertion_set.execute(code, block);
    }
}
