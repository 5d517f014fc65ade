//! Rewriting the code with the result of a coloring round: either every tmp gets its register,
//! or the spilled tmps are moved to the stack and the round is retried.

use std::collections::HashMap;

use crate::{
    air::{
        arg::{Arg, ArgRole},
        code::Code,
        insertion_set::InsertionSet,
        opcode::Opcode,
        stack_slot::{StackSlotId, StackSlotKind},
        tmp::Tmp,
        tmp_width::TmpWidth,
        use_counts::UseCounts,
    },
    bank::Bank,
    utils::bitvector::BitVector,
    width::{bytes_for_width, Width},
};

use super::{allocator::ColoringAllocator, coloring::ColoringStrategy, AllocateRegistersStats};

#[derive(Clone, Copy)]
struct Range {
    first: usize,
    last: usize,
    count: usize,
    admit_stack_count: usize,
}

impl Default for Range {
    fn default() -> Self {
        Self {
            first: usize::MAX,
            last: 0,
            count: 0,
            admit_stack_count: 0,
        }
    }
}

impl Range {
    fn record(&mut self, global_index: usize) {
        if global_index < self.first {
            self.first = global_index;
        }
        self.last = global_index;
    }
}

/// Tmps that spilling cannot help with: their whole live range spans at most two consecutive
/// instructions and at least one of their uses cannot take a stack slot instead. Fast tmps are
/// unspillable too.
pub fn compute_unspillable_tmps(
    code: &Code,
    bank: Bank,
    stats: &mut AllocateRegistersStats,
) -> BitVector {
    let array_size = Tmp::absolute_index_for_tmp_count(code.num_tmps(bank));
    let mut ranges = vec![Range::default(); array_size];

    // Block boundaries advance the counter too, so ranges never look short across blocks.
    let mut global_index = 0;
    for block in code.blocks.iter() {
        for inst in block.insts.iter() {
            for (arg_index, arg) in inst.args.iter().enumerate() {
                let (_, arg_bank, _) = inst.form_at(arg_index);
                if arg.is_tmp() && inst.admits_stack(arg_index) {
                    if arg_bank != bank {
                        continue;
                    }
                    let range = &mut ranges[arg.as_tmp().absolute_index()];
                    range.count += 1;
                    range.admit_stack_count += 1;
                    range.record(global_index);
                    continue;
                }

                arg.for_each_tmp_fast(|tmp| {
                    if tmp.bank() != bank {
                        return;
                    }
                    let range = &mut ranges[tmp.absolute_index()];
                    range.count += 1;
                    range.record(global_index);
                });
            }

            global_index += 1;
        }
        global_index += 1;
    }

    let mut unspillable_tmps = BitVector::with_capacity(array_size);
    for (index, range) in ranges
        .iter()
        .enumerate()
        .skip(Tmp::last_machine_register_index() + 1)
    {
        if range.last.wrapping_sub(range.first) <= 1 && range.count > range.admit_stack_count {
            log::trace!(
                "{} is unspillable because of its short live range",
                Tmp::tmp_for_absolute_index(bank, index)
            );
            unspillable_tmps.quick_set(index, true);
            stats.num_unspillable_tmps += 1;
        }
    }

    for &tmp in code.fast_tmps.iter().filter(|tmp| tmp.bank() == bank) {
        log::trace!("{} is unspillable because it is a fast tmp", tmp);
        unspillable_tmps.set(tmp.absolute_index(), true);
        stats.num_unspillable_tmps += 1;
    }

    unspillable_tmps
}

/// Replaces every tmp of the allocator's bank with its register and drops the moves that became
/// `Move %r, %r`.
pub fn assign_registers_to_tmp<'a, S: ColoringStrategy<'a>>(
    code: &mut Code,
    allocator: &ColoringAllocator<'a, S>,
) {
    let bank = allocator.bank();

    for block in code.blocks.iter_mut() {
        block.insts.retain_mut(|inst| {
            // Coalescability changes once the tmps are registers, so it is decided upfront.
            let may_be_coalescable = allocator.may_be_coalescable(inst);

            inst.for_each_tmp_fast_mut(|tmp| {
                if tmp.is_reg() || tmp.bank() != bank {
                    return;
                }

                let alias_tmp = allocator.get_alias(*tmp);
                *tmp = if alias_tmp.is_reg() {
                    alias_tmp
                } else {
                    Tmp::from_reg(allocator.allocated_reg(alias_tmp))
                };
                debug_assert!(tmp.is_reg());
            });

            !(may_be_coalescable
                && inst.args[0].is_tmp()
                && inst.args[1].is_tmp()
                && inst.args[0].as_tmp() == inst.args[1].as_tmp())
        });
    }
}

/// Byte size of the spill slot for a tmp of the given required width.
pub fn stack_slot_minimum_width(width: Width) -> u32 {
    if width <= Width::W32 {
        4
    } else if width <= Width::W64 {
        8
    } else {
        16
    }
}

fn spill_move_opcode(bank: Bank, slot_size: u32) -> Opcode {
    match (slot_size, bank) {
        (4, Bank::GP) => Opcode::Move32,
        (4, Bank::FP) => Opcode::MoveFloat,
        (8, Bank::GP) => Opcode::Move,
        (8, Bank::FP) => Opcode::MoveDouble,
        (16, Bank::FP) => Opcode::MoveVector,
        _ => unreachable!("no {} spill move for a {} byte slot", bank, slot_size),
    }
}

/// Gives every spilled tmp a stack slot and rewrites the code so that no instruction refers to a
/// spilled tmp anymore. Where an instruction admits a stack operand, the slot is used in place.
/// Otherwise the value goes through a fresh, unspillable tmp that is loaded before the instruction
/// (or rematerialized if it is a constant) and stored after it.
pub fn add_spill_and_fill<'a, S: ColoringStrategy<'a>>(
    code: &mut Code,
    allocator: &ColoringAllocator<'a, S>,
    tmp_width: &TmpWidth,
    use_counts: &UseCounts,
    unspillable_tmps: &mut BitVector,
    stats: &mut AllocateRegistersStats,
) {
    let bank = allocator.bank();

    let mut stack_slots = HashMap::<Tmp, StackSlotId>::new();
    for tmp in allocator.spilled_tmps() {
        // All the spilled tmps become unspillable.
        unspillable_tmps.set(tmp.absolute_index(), true);

        let stack_slot = code.add_stack_slot(
            stack_slot_minimum_width(tmp_width.required_width(tmp)),
            StackSlotKind::Spill,
        );
        let is_new_tmp = stack_slots.insert(tmp, stack_slot).is_none();
        debug_assert!(is_new_tmp);
        stats.num_spill_stack_slots += 1;
        log::trace!("Spilling {} to {:?}", tmp, stack_slot);
    }

    let mut insertion_set = InsertionSet::new();
    for block_id in code.indices().collect::<Vec<_>>() {
        let mut has_aliased_tmps = false;

        for inst_index in 0..code.block(block_id).insts.len() {
            let mut inst = code.block(block_id).insts[inst_index].clone();

            // Tmp widths may say that a Move only carries 32 bits. That only matters once the move
            // becomes a load or a store: between registers Move is the canonical form.
            let mut can_use_move32_if_did_spill = false;
            if bank == Bank::GP && inst.opcode == Opcode::Move {
                let is_narrow = |arg: &Arg| arg.is_tmp() && tmp_width.width(arg.as_tmp()) <= Width::W32;
                can_use_move32_if_did_spill = inst.args.iter().take(2).any(is_narrow);
            }

            // Try to replace the tmp by its stack slot.
            let mut did_spill = false;
            let mut needs_scratch = false;
            for arg_index in 0..inst.args.len() {
                let arg = inst.args[arg_index];
                if !arg.is_tmp() || arg.is_reg() {
                    continue;
                }
                let (role, arg_bank, width) = inst.form_at(arg_index);
                if arg_bank != bank {
                    continue;
                }
                let tmp = arg.as_tmp();
                let Some(&stack_slot) = stack_slots.get(&tmp) else {
                    continue;
                };

                let mut needs_scratch_if_spilled_in_place = false;
                if !inst.admits_stack(arg_index) {
                    let is_spill_move = matches!(
                        inst.opcode,
                        Opcode::Move | Opcode::MoveDouble | Opcode::MoveFloat | Opcode::Move32
                    );
                    let other_is_spill_slot = inst.args.len() == 2
                        && inst.args.get(arg_index ^ 1).is_some_and(|other| {
                            other.is_stack() && code.stack_slot(other.stack_slot()).is_spill()
                        });
                    if !(is_spill_move && other_is_spill_slot) {
                        continue;
                    }
                    needs_scratch_if_spilled_in_place = true;
                }

                // Constants are rematerialized, which needs the tmp to stay in the instruction.
                if !role.is_cold_use() && use_counts.is_const_def(bank, tmp.absolute_index()) {
                    continue;
                }

                let spill_width = tmp_width.required_width(tmp);
                if role.is_any_def() && width < spill_width {
                    // Either a user reads more than this def writes or a producer writes more
                    // non-zero bits than this def covers.
                    continue;
                }
                debug_assert!(
                    inst.opcode == Opcode::Move || !(role.is_any_use() && width > spill_width)
                );

                if spill_width != Width::W32 {
                    can_use_move32_if_did_spill = false;
                }

                let byte_size = if can_use_move32_if_did_spill {
                    4
                } else {
                    bytes_for_width(width) as u32
                };
                code.stack_slot_mut(stack_slot).ensure_size(byte_size);
                inst.args[arg_index] = Arg::stack(stack_slot, 0);
                did_spill = true;
                needs_scratch |= needs_scratch_if_spilled_in_place;
            }

            if did_spill && can_use_move32_if_did_spill {
                inst.opcode = Opcode::Move32;
            }

            if needs_scratch {
                let inst_bank = match inst.opcode {
                    Opcode::Move | Opcode::Move32 => Bank::GP,
                    Opcode::MoveDouble | Opcode::MoveFloat => Bank::FP,
                    opcode => unreachable!("{} cannot move between spill slots", opcode),
                };
                assert_eq!(inst_bank, bank);

                let scratch = code.new_tmp(bank);
                stats.num_spill_tmps += 1;
                unspillable_tmps.set(scratch.absolute_index(), true);
                inst.args.push(Arg::tmp(scratch));
                assert_eq!(inst.args.len(), 3);

                // Without the padding, the scratch of successive spill moves would interfere with
                // each other, as would the scratch and the late effects of the previous
                // instruction.
                insertion_set.insert(inst_index, Opcode::Nop, &[]);
                stats.num_move_spill_spill_insts += 1;
                code.block_mut(block_id).insts[inst_index] = inst;
                continue;
            }

            // For every other case, add loads and stores as needed.
            inst.for_each_tmp_mut(|tmp, role, arg_bank, _| {
                if tmp.is_reg() || arg_bank != bank {
                    return;
                }

                let Some(&stack_slot) = stack_slots.get(tmp) else {
                    let alias = allocator.get_alias_when_spilling(*tmp);
                    if alias != *tmp {
                        *tmp = alias;
                        has_aliased_tmps = true;
                    }
                    return;
                };

                let spill_width = tmp_width.required_width(*tmp);
                let mov = spill_move_opcode(bank, stack_slot_minimum_width(spill_width));

                let old_tmp = *tmp;
                let new_tmp = code.new_tmp(bank);
                stats.num_spill_tmps += 1;
                log::trace!("{} is replaced by {} around the instruction", old_tmp, new_tmp);
                *tmp = new_tmp;
                unspillable_tmps.set(new_tmp.absolute_index(), true);

                if role == ArgRole::Scratch {
                    return;
                }

                let slot = Arg::stack(stack_slot, 0);
                if role.is_any_use() {
                    if bank == Bank::GP && use_counts.is_const_def(bank, old_tmp.absolute_index()) {
                        let value = use_counts.constant(bank, old_tmp.absolute_index());
                        insertion_set.insert(
                            inst_index,
                            Opcode::Move,
                            &[Arg::imm_or_big_imm(value), Arg::tmp(new_tmp)],
                        );
                        stats.num_rematerialize_const += 1;
                    } else {
                        insertion_set.insert(inst_index, mov, &[slot, Arg::tmp(new_tmp)]);
                        stats.num_load_spill += 1;
                    }
                }

                if role.is_any_def() {
                    insertion_set.insert(inst_index + 1, mov, &[Arg::tmp(new_tmp), slot]);
                    stats.num_store_spill += 1;
                }
            });

            code.block_mut(block_id).insts[inst_index] = inst;
        }

        insertion_set.execute(code, block_id);

        if has_aliased_tmps {
            code.block_mut(block_id)
                .insts
                .retain(|inst| !allocator.is_useless_move(inst));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::air::{basic_block::Frequency, inst::Inst};

    fn stats() -> AllocateRegistersStats {
        AllocateRegistersStats::new(Bank::GP)
    }

    #[test]
    fn test_stack_slot_minimum_width() {
        assert_eq!(stack_slot_minimum_width(Width::W8), 4);
        assert_eq!(stack_slot_minimum_width(Width::W32), 4);
        assert_eq!(stack_slot_minimum_width(Width::W64), 8);
        assert_eq!(stack_slot_minimum_width(Width::W128), 16);
    }

    #[test]
    fn test_short_ranges_are_unspillable() {
        let mut code = Code::default();
        let entry = code.add_block(1.0);
        let exit = code.add_block(1.0);
        let short = code.new_tmp(Bank::GP);
        let long = code.new_tmp(Bank::GP);
        let stackable = code.new_tmp(Bank::GP);
        let across_blocks = code.new_tmp(Bank::GP);
        let fast = code.new_tmp(Bank::GP);
        code.add_fast_tmp(fast);

        code.append(entry, Inst::new(Opcode::Move, &[Arg::imm(1), Arg::tmp(long)]));
        code.append(entry, Inst::new(Opcode::Move, &[Arg::imm(2), Arg::tmp(fast)]));
        code.append(entry, Inst::new(Opcode::Move, &[Arg::imm(3), Arg::tmp(short)]));
        code.append(entry, Inst::new(Opcode::Add64, &[Arg::tmp(short), Arg::tmp(long)]));
        code.append(entry, Inst::new(Opcode::Move, &[Arg::tmp(long), Arg::tmp(stackable)]));
        code.append(entry, Inst::new(Opcode::Move, &[Arg::tmp(stackable), Arg::tmp(across_blocks)]));
        code.append(entry, Inst::new(Opcode::Jump, &[]));
        code.add_edge(entry, exit, Frequency::Normal);
        code.append(exit, Inst::new(Opcode::Add64, &[Arg::tmp(fast), Arg::tmp(across_blocks)]));
        code.append(exit, Inst::new(Opcode::Ret64, &[Arg::tmp(across_blocks)]));

        let mut stats = stats();
        let unspillable = compute_unspillable_tmps(&code, Bank::GP, &mut stats);

        // Every access to `short` can take a stack slot, so its short range does not matter.
        assert!(!unspillable.get(short.absolute_index()));
        assert!(!unspillable.get(long.absolute_index()));
        assert!(!unspillable.get(stackable.absolute_index()));
        assert!(!unspillable.get(across_blocks.absolute_index()));
        assert!(unspillable.get(fast.absolute_index()));
        assert_eq!(stats.num_unspillable_tmps, 1);
    }

    #[test]
    fn test_short_range_without_stack_operand_is_unspillable() {
        let mut code = Code::default();
        let block = code.add_block(1.0);
        let base = code.new_tmp(Bank::GP);
        let value = code.new_tmp(Bank::GP);

        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(64), Arg::tmp(base)]));
        code.append(block, Inst::new(Opcode::Move, &[Arg::addr(base, 8), Arg::tmp(value)]));
        code.append(block, Inst::new(Opcode::Ret64, &[Arg::tmp(value)]));

        let mut stats = stats();
        let unspillable = compute_unspillable_tmps(&code, Bank::GP, &mut stats);

        // The address base can never be a stack slot.
        assert!(unspillable.get(base.absolute_index()));
        // Ret64 does not admit stack either.
        assert!(unspillable.get(value.absolute_index()));
        assert_eq!(stats.num_unspillable_tmps, 2);
    }
}
