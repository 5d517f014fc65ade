use std::fmt;

use tinyvec::TinyVec;

use crate::{
    air::{
        arg::Arg,
        code::Code,
        inst::Inst,
        liveness_adapter::{compute_tmp_liveness, TmpLivenessAdapter},
        opcode::Opcode,
        tmp::Tmp,
        tmp_width::TmpWidth,
        use_counts::UseCounts,
    },
    bank::Bank,
    jit::{reg::Reg, register_set::PreservedWidth},
    liveness::LocalCalc,
    utils::bitvector::BitVector,
    width::Width,
};

use super::coloring::{ColoringCore, ColoringStrategy};

/// Builds the interference graph of one bank of a [`Code`] and colors it with the strategy `S`.
///
/// The allocator only reads the code while building. Rewriting the code with the result is up to
/// the caller.
pub struct ColoringAllocator<'a, S: ColoringStrategy<'a>> {
    strategy: S,
    tmp_width: &'a TmpWidth,
}

impl<'a, S: ColoringStrategy<'a>> ColoringAllocator<'a, S> {
    pub fn new(
        code: &Code,
        bank: Bank,
        tmp_width: &'a TmpWidth,
        use_counts: &'a UseCounts,
        unspillable_tmps: &'a BitVector,
    ) -> Self {
        let tmp_array_size = Tmp::absolute_index_for_tmp_count(code.num_tmps(bank));
        let mut core = ColoringCore::new(
            bank,
            code.regs_in_priority_order(bank).to_vec(),
            tmp_array_size,
            unspillable_tmps,
            use_counts,
        );
        code.pinned_regs
            .for_each_in_bank(bank, |reg| core.add_pinned_reg(reg));

        let mut this = Self {
            strategy: S::new(core),
            tmp_width,
        };
        this.build(code);
        this
    }

    pub fn allocate(&mut self) {
        self.strategy.allocate();
    }

    pub fn bank(&self) -> Bank {
        self.strategy.bank()
    }

    pub fn requires_spilling(&self) -> bool {
        self.strategy.requires_spilling()
    }

    pub fn spilled_tmps(&self) -> impl Iterator<Item = Tmp> + use<'_, 'a, S> {
        self.strategy.spilled_tmps()
    }

    pub fn get_alias(&self, tmp: Tmp) -> Tmp {
        let alias = self.strategy.get_alias(self.strategy.tmp_to_index(tmp));
        self.strategy.tmp_for_index(alias)
    }

    /// The alias of `tmp` as far as coalescing went before the first spill was selected.
    pub fn get_alias_when_spilling(&self, tmp: Tmp) -> Tmp {
        let alias = self
            .strategy
            .get_alias_at_spill(self.strategy.tmp_to_index(tmp));
        self.strategy.tmp_for_index(alias)
    }

    /// # Panics
    ///
    /// Panics if the last round spilled or `tmp` was never colored.
    pub fn allocated_reg(&self, tmp: Tmp) -> Reg {
        self.strategy.color(self.strategy.tmp_to_index(tmp))
    }

    pub fn may_be_coalescable(&self, inst: &Inst) -> bool {
        may_be_coalescable_impl(self.bank(), inst, Some(self.tmp_width))
    }

    pub fn is_useless_move(&self, inst: &Inst) -> bool {
        is_useless_move(self.bank(), inst)
    }

    pub fn dump_interference_graph_in_dot(&self, out: &mut impl fmt::Write) -> fmt::Result {
        self.strategy.dump_interference_graph_in_dot(out)
    }

    fn build(&mut self, code: &Code) {
        let bank = self.bank();
        let mut liveness = compute_tmp_liveness(code, bank);

        for block_id in code.indices() {
            let insts = &code.block(block_id).insts;
            let mut local_calc = liveness.local_calc(block_id);

            for inst_index in (0..insts.len()).rev() {
                self.build_between(Some(&insts[inst_index]), insts.get(inst_index + 1), &local_calc);
                local_calc.execute(inst_index);
            }

            self.build_between(None, insts.first(), &local_calc);
        }

        // Always marks where low priority moves start, even when there are none, so the move
        // worklist knows which of its lists each move index belongs to.
        self.strategy.start_adding_low_priority_moves();
        if code.options.air_coalesce_aliasing_defs {
            self.build_low_priority_move_list(code);
        }
    }

    fn build_between(
        &mut self,
        prev_inst: Option<&Inst>,
        next_inst: Option<&Inst>,
        local_calc: &LocalCalc<'_, TmpLivenessAdapter<'_>>,
    ) {
        let bank = self.bank();

        if log::log_enabled!(log::Level::Trace) {
            let live = local_calc
                .live()
                .map(|tmp| format!("{}:{}", tmp, self.tmp_width.use_width(tmp)))
                .collect::<Vec<_>>();
            log::trace!(
                "Building between {:?} and {:?}, live: [{}]",
                prev_inst,
                next_inst,
                live.join(", ")
            );
        }

        // All the defs interfere with each other and with the extra clobbered registers. Colored
        // tmps need no edges between themselves, hence the inner walk without the clobbers.
        let mut edges = TinyVec::<[(Tmp, Tmp); 8]>::new();
        Inst::for_each_def_with_extra_clobbered_regs(
            prev_inst,
            next_inst,
            |arg, role, arg_bank, _, preserved_width| {
                if arg_bank != bank {
                    return;
                }
                debug_assert!(role.is_any_def());

                Inst::for_each_def(prev_inst, next_inst, |other_arg, _, other_bank, def_width| {
                    if other_bank != bank {
                        return;
                    }
                    if def_width <= Width::W64 && preserved_width == PreservedWidth::Preserves64 {
                        log::trace!(
                            "Skipping def-def edge {}, {}: {} preserves the low bits",
                            arg,
                            other_arg,
                            arg
                        );
                        return;
                    }
                    edges.push((arg, other_arg));
                });
            },
        );
        for (a, b) in edges {
            self.add_edge(a, b);
        }

        match prev_inst.filter(|inst| self.may_be_coalescable(inst)) {
            Some(prev_inst) => {
                // The use of the move must not interfere with its def, even if it is live after
                // the move. Otherwise the move could never be coalesced.
                let mut def_tmp = Tmp::empty();
                let mut use_tmp = Tmp::empty();
                prev_inst.for_each_tmp(|tmp, role, _, _| {
                    if role.is_late_def() {
                        def_tmp = tmp;
                    } else {
                        debug_assert!(role.is_early_use());
                        use_tmp = tmp;
                    }
                });
                debug_assert!(def_tmp.is_set() && use_tmp.is_set());

                let src_index = self.strategy.tmp_to_index(use_tmp);
                let dst_index = self.strategy.tmp_to_index(def_tmp);
                let move_index = self.strategy.add_move(src_index, dst_index);
                log::trace!("Move at index {} is: {}", move_index, prev_inst);

                let pinned_regs = self.strategy.pinned_regs.clone();
                for live_tmp in local_calc.live().chain(pinned_regs) {
                    if live_tmp != use_tmp {
                        self.add_edge(def_tmp, live_tmp);
                    }
                }

                // The next instruction may have early defs or early clobbers.
                self.add_edges(None, next_inst, local_calc);
            }
            None => self.add_edges(prev_inst, next_inst, local_calc),
        }
    }

    /// Every def interferes with everything live at the boundary.
    fn add_edges(
        &mut self,
        prev_inst: Option<&Inst>,
        next_inst: Option<&Inst>,
        local_calc: &LocalCalc<'_, TmpLivenessAdapter<'_>>,
    ) {
        let bank = self.bank();
        let tmp_width = self.tmp_width;
        let pinned_regs = &self.strategy.pinned_regs;

        let mut edges = TinyVec::<[(Tmp, Tmp); 8]>::new();
        Inst::for_each_def_with_extra_clobbered_regs(
            prev_inst,
            next_inst,
            |arg, role, arg_bank, _, preserved_width| {
                if arg_bank != bank {
                    return;
                }
                debug_assert!(role.is_any_def());

                for live_tmp in local_calc.live() {
                    debug_assert_eq!(live_tmp.bank(), bank);
                    if tmp_width.use_width(live_tmp) <= Width::W64
                        && preserved_width == PreservedWidth::Preserves64
                    {
                        log::trace!(
                            "Skipping def-live edge {}, {}: the def preserves the low bits",
                            arg,
                            live_tmp
                        );
                        continue;
                    }
                    edges.push((arg, live_tmp));
                }

                for &pinned_reg in pinned_regs.iter() {
                    edges.push((arg, pinned_reg));
                }
            },
        );

        for (a, b) in edges {
            self.add_edge(a, b);
        }
    }

    /// Three-operand instructions whose destination would like to share a register with one of
    /// the sources get a low priority move per source.
    fn build_low_priority_move_list(&mut self, code: &Code) {
        for block in code.blocks.iter() {
            for inst in block.insts.iter() {
                let Some(def_arg_index) = inst.should_try_aliasing_def() else {
                    continue;
                };

                let op1 = inst.args[def_arg_index - 2];
                let op2 = inst.args[def_arg_index - 1];
                let dest = inst.args[def_arg_index];

                if op1 == dest || op2 == dest {
                    continue;
                }

                if self.may_be_coalesced(&op1, &dest) {
                    self.add_to_low_priority_coalescing_candidates(&op1, &dest);
                }
                if op1 != op2 && self.may_be_coalesced(&op2, &dest) {
                    self.add_to_low_priority_coalescing_candidates(&op2, &dest);
                }
            }
        }
    }

    fn may_be_coalesced(&self, left: &Arg, right: &Arg) -> bool {
        if !left.is_tmp() || !right.is_tmp() {
            return false;
        }

        let left_tmp = left.as_tmp();
        let right_tmp = right.as_tmp();
        if left_tmp == right_tmp {
            return false;
        }

        let bank = self.bank();
        if left_tmp.bank() != bank || right_tmp.bank() != bank {
            return false;
        }

        !self.strategy.has_interference_edge(
            self.strategy.tmp_to_index(left_tmp),
            self.strategy.tmp_to_index(right_tmp),
        )
    }

    fn add_to_low_priority_coalescing_candidates(&mut self, left: &Arg, right: &Arg) {
        debug_assert!(self.may_be_coalesced(left, right));
        let left_index = self.strategy.tmp_to_index(left.as_tmp());
        let right_index = self.strategy.tmp_to_index(right.as_tmp());
        let move_index = self.strategy.add_low_priority_move(left_index, right_index);
        log::trace!(
            "Low priority move {} between {} and {}",
            move_index,
            left,
            right
        );
    }

    fn add_edge(&mut self, a: Tmp, b: Tmp) {
        debug_assert_eq!(
            a.bank(),
            b.bank(),
            "an interference between banks can make the graph uncolorable"
        );
        let a = self.strategy.tmp_to_index(a);
        let b = self.strategy.tmp_to_index(b);
        self.strategy.add_edge(a, b);
    }
}

/// Whether `inst` is a move between two tmps of `bank` that coalescing could remove.
///
/// Without widths, `Move32` is assumed to never be coalescable. With widths, it is coalescable
/// when its source is already zero-extended from 32 bits.
pub fn may_be_coalescable_impl(bank: Bank, inst: &Inst, tmp_width: Option<&TmpWidth>) -> bool {
    let is_bank_move = match bank {
        Bank::GP => matches!(inst.opcode, Opcode::Move | Opcode::Move32),
        Bank::FP => matches!(
            inst.opcode,
            Opcode::MoveFloat | Opcode::MoveDouble | Opcode::MoveVector
        ),
    };
    if !is_bank_move {
        return false;
    }

    // Avoid the three-operand spill-to-spill moves.
    if inst.args.len() != 2 {
        return false;
    }

    if !inst.args[0].is_tmp() || !inst.args[1].is_tmp() {
        return false;
    }
    debug_assert_eq!(inst.args[0].bank(), bank);
    debug_assert_eq!(inst.args[1].bank(), bank);

    if inst.opcode == Opcode::Move32 {
        match tmp_width {
            Some(tmp_width) if tmp_width.def_width(inst.args[0].as_tmp()) <= Width::W32 => {}
            _ => return false,
        }
    }

    true
}

pub fn is_useless_move(bank: Bank, inst: &Inst) -> bool {
    may_be_coalescable_impl(bank, inst, None) && inst.args[0].as_tmp() == inst.args[1].as_tmp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        air::{
            graph_coloring::{briggs::Briggs, irc::Irc},
            tmp_width::TmpWidth,
        },
        jit::register_set::RegisterSet,
        utils::interference_graph::SmallInterferenceGraph,
    };

    fn gp(tmp: Tmp) -> Arg {
        Arg::tmp(tmp)
    }

    struct Fixture {
        code: Code,
        tmp_width: TmpWidth,
        use_counts: UseCounts,
        unspillable: BitVector,
    }

    impl Fixture {
        fn new(code: Code) -> Self {
            let mut tmp_width = TmpWidth::new();
            tmp_width.recompute(&code, Bank::GP);
            let use_counts = UseCounts::new(&code);
            Self {
                code,
                tmp_width,
                use_counts,
                unspillable: BitVector::new(),
            }
        }

        fn briggs(&self) -> ColoringAllocator<'_, Briggs<'_, SmallInterferenceGraph>> {
            ColoringAllocator::new(
                &self.code,
                Bank::GP,
                &self.tmp_width,
                &self.use_counts,
                &self.unspillable,
            )
        }

        fn irc(&self) -> ColoringAllocator<'_, Irc<'_, SmallInterferenceGraph>> {
            ColoringAllocator::new(
                &self.code,
                Bank::GP,
                &self.tmp_width,
                &self.use_counts,
                &self.unspillable,
            )
        }
    }

    fn interferes<'a, S: ColoringStrategy<'a>>(
        allocator: &ColoringAllocator<'a, S>,
        a: Tmp,
        b: Tmp,
    ) -> bool {
        allocator.strategy.has_interference_edge(a.absolute_index(), b.absolute_index())
    }

    #[test]
    fn test_build_edges_and_moves() {
        let mut code = Code::default();
        let block = code.add_block(1.0);
        let a = code.new_tmp(Bank::GP);
        let b = code.new_tmp(Bank::GP);
        let c = code.new_tmp(Bank::GP);

        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(1), gp(a)]));
        code.append(block, Inst::new(Opcode::Move, &[gp(a), gp(b)]));
        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(2), gp(c)]));
        code.append(block, Inst::new(Opcode::Add64, &[gp(a), gp(c)]));
        code.append(block, Inst::new(Opcode::Add64, &[gp(b), gp(c)]));
        code.append(block, Inst::new(Opcode::Ret64, &[gp(c)]));

        let fixture = Fixture::new(code);
        let allocator = fixture.briggs();

        // a is live across the move into b, but a move's source never interferes with its def.
        assert!(!interferes(&allocator, a, b));
        assert!(interferes(&allocator, c, a));
        assert!(interferes(&allocator, c, b));
        assert_eq!(allocator.strategy.coalescing_candidates.len(), 1);
        assert_eq!(
            allocator.strategy.move_operands(0),
            (a.absolute_index(), b.absolute_index())
        );
    }

    #[test]
    fn test_clobbers_interfere_with_live_tmps() {
        let mut code = Code::default();
        let block = code.add_block(1.0);
        let callee = code.new_tmp(Bank::GP);
        let live = code.new_tmp(Bank::GP);
        let r0 = Reg::new_gpr(0);
        let r1 = Reg::new_gpr(1);
        let mut clobbers = RegisterSet::from_regs(&[r0]);
        clobbers.add_upper_half(r1);

        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(0), gp(callee)]));
        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(7), gp(live)]));
        code.append(block, Inst::call(&[gp(callee)], clobbers, RegisterSet::new()));
        code.append(block, Inst::new(Opcode::Ret64, &[gp(live)]));

        let fixture = Fixture::new(code);
        let allocator = fixture.irc();

        assert!(interferes(&allocator, Tmp::from_reg(r0), live));
        // r1 keeps its low 64 bits across the call.
        assert!(!interferes(&allocator, Tmp::from_reg(r1), live));
        assert!(!interferes(&allocator, Tmp::from_reg(r0), callee));
    }

    #[test]
    fn test_pinned_registers_interfere_with_every_def() {
        let mut code = Code::default();
        let pinned = Reg::new_gpr(15);
        code.pin_register(pinned);
        let block = code.add_block(1.0);
        let a = code.new_tmp(Bank::GP);
        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(0), gp(a)]));
        code.append(block, Inst::new(Opcode::Ret64, &[gp(a)]));

        let fixture = Fixture::new(code);
        let mut allocator = fixture.irc();
        assert!(interferes(&allocator, a, Tmp::from_reg(pinned)));
        assert_eq!(allocator.strategy.register_count(), 16);

        allocator.allocate();
        assert!(!allocator.requires_spilling());
        assert_ne!(allocator.allocated_reg(a), pinned);
    }

    #[test]
    fn test_low_priority_moves_for_aliasing_defs() {
        let mut code = Code::default();
        code.options.air_coalesce_aliasing_defs = true;
        let block = code.add_block(1.0);
        let a = code.new_tmp(Bank::GP);
        let b = code.new_tmp(Bank::GP);
        let c = code.new_tmp(Bank::GP);

        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(1), gp(a)]));
        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(2), gp(b)]));
        code.append(block, Inst::new(Opcode::Add64, &[gp(a), gp(b), gp(c)]));
        code.append(block, Inst::new(Opcode::Ret64, &[gp(c)]));

        let fixture = Fixture::new(code);
        let mut allocator = fixture.irc();
        // Both sources die at the add, so c may alias either of them.
        assert_eq!(allocator.strategy.coalescing_candidates.len(), 2);

        allocator.allocate();
        assert!(!allocator.requires_spilling());
        let c_reg = allocator.allocated_reg(allocator.get_alias(c));
        assert!(
            c_reg == allocator.allocated_reg(allocator.get_alias(a))
                || c_reg == allocator.allocated_reg(allocator.get_alias(b))
        );
    }

    #[test]
    fn test_aliasing_defs_can_be_disabled() {
        let mut code = Code::default();
        code.options.air_coalesce_aliasing_defs = false;
        let block = code.add_block(1.0);
        let a = code.new_tmp(Bank::GP);
        let b = code.new_tmp(Bank::GP);
        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(1), gp(a)]));
        code.append(block, Inst::new(Opcode::Add64, &[gp(a), gp(a), gp(b)]));
        code.append(block, Inst::new(Opcode::Ret64, &[gp(b)]));

        let fixture = Fixture::new(code);
        let allocator = fixture.briggs();
        assert!(allocator.strategy.coalescing_candidates.is_empty());
    }

    #[test]
    fn test_may_be_coalescable() {
        let a = Tmp::gp_tmp_for_index(0);
        let b = Tmp::gp_tmp_for_index(1);
        let f = Tmp::fp_tmp_for_index(0);
        let g = Tmp::fp_tmp_for_index(1);

        let mov = Inst::new(Opcode::Move, &[gp(a), gp(b)]);
        assert!(may_be_coalescable_impl(Bank::GP, &mov, None));
        assert!(!may_be_coalescable_impl(Bank::FP, &mov, None));

        let imm = Inst::new(Opcode::Move, &[Arg::imm(1), gp(b)]);
        assert!(!may_be_coalescable_impl(Bank::GP, &imm, None));

        let spill_move = Inst::new(Opcode::Move, &[gp(a), gp(b), gp(a)]);
        assert!(!may_be_coalescable_impl(Bank::GP, &spill_move, None));

        let double = Inst::new(Opcode::MoveDouble, &[Arg::tmp(f), Arg::tmp(g)]);
        assert!(may_be_coalescable_impl(Bank::FP, &double, None));

        let mut code = Code::default();
        let block = code.add_block(1.0);
        let narrow = code.new_tmp(Bank::GP);
        let wide = code.new_tmp(Bank::GP);
        let dst = code.new_tmp(Bank::GP);
        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(3), gp(narrow)]));
        code.append(block, Inst::new(Opcode::Move, &[Arg::imm(-3), gp(wide)]));
        code.append(block, Inst::new(Opcode::Move32, &[gp(narrow), gp(dst)]));
        code.append(block, Inst::new(Opcode::Move32, &[gp(wide), gp(dst)]));
        let mut tmp_width = TmpWidth::new();
        tmp_width.recompute(&code, Bank::GP);

        let insts = &code.block(block).insts;
        assert!(!may_be_coalescable_impl(Bank::GP, &insts[2], None));
        assert!(may_be_coalescable_impl(Bank::GP, &insts[2], Some(&tmp_width)));
        assert!(!may_be_coalescable_impl(Bank::GP, &insts[3], Some(&tmp_width)));
    }

    #[test]
    fn test_is_useless_move() {
        let a = Tmp::gp_tmp_for_index(0);
        let b = Tmp::gp_tmp_for_index(1);
        assert!(is_useless_move(Bank::GP, &Inst::new(Opcode::Move, &[gp(a), gp(a)])));
        assert!(!is_useless_move(Bank::GP, &Inst::new(Opcode::Move, &[gp(a), gp(b)])));
        assert!(!is_useless_move(Bank::GP, &Inst::new(Opcode::Move32, &[gp(a), gp(a)])));
    }
}
