//! Register allocation by graph coloring.
//!
//! Each bank is allocated independently. A round builds the interference graph of the bank,
//! colors it with either Briggs' optimistic allocator or iterated register coalescing, and either
//! rewrites every tmp to its register or spills the tmps that did not get one and tries again.

pub mod allocator;
pub mod briggs;
pub mod coloring;
pub mod irc;
pub mod moves;
pub mod spill;

use std::fmt;

use crate::{
    air::{
        code::Code, fix_spills_after_terminals::fix_spills_after_terminals,
        pad_interference::pad_interference, tmp::Tmp, tmp_width::TmpWidth,
        use_counts::UseCounts,
    },
    bank::Bank,
    error::{AirError, Result},
    options::AllocatorKind,
    utils::{
        bitvector::BitVector,
        interference_graph::{
            HugeInterferenceGraph, InterferenceGraph, LargeInterferenceGraph,
            SmallInterferenceGraph, MAX_SIZE_FOR_SMALL_INTERFERENCE_GRAPH,
        },
    },
};

use self::{
    allocator::ColoringAllocator,
    briggs::Briggs,
    coloring::ColoringStrategy,
    irc::Irc,
    spill::{add_spill_and_fill, assign_registers_to_tmp, compute_unspillable_tmps},
};

/// What allocation did to one bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocateRegistersStats {
    pub bank: Bank,
    pub num_tmps_in: usize,
    pub num_tmps_out: usize,
    pub num_unspillable_tmps: usize,
    pub num_spill_stack_slots: usize,
    pub num_spill_tmps: usize,
    pub num_load_spill: usize,
    pub num_store_spill: usize,
    pub num_rematerialize_const: usize,
    pub num_move_spill_spill_insts: usize,
    pub num_iterations: usize,
}

impl AllocateRegistersStats {
    pub fn new(bank: Bank) -> Self {
        Self {
            bank,
            num_tmps_in: 0,
            num_tmps_out: 0,
            num_unspillable_tmps: 0,
            num_spill_stack_slots: 0,
            num_spill_tmps: 0,
            num_load_spill: 0,
            num_store_spill: 0,
            num_rematerialize_const: 0,
            num_move_spill_spill_insts: 0,
            num_iterations: 0,
        }
    }
}

impl fmt::Display for AllocateRegistersStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: tmps in = {}, tmps out = {}, unspillable = {}, spill slots = {}, spill tmps = {}, \
             loads = {}, stores = {}, rematerialized = {}, spill to spill moves = {}, iterations = {}",
            self.bank,
            self.num_tmps_in,
            self.num_tmps_out,
            self.num_unspillable_tmps,
            self.num_spill_stack_slots,
            self.num_spill_tmps,
            self.num_load_spill,
            self.num_store_spill,
            self.num_rematerialize_const,
            self.num_move_spill_spill_insts,
            self.num_iterations
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphColoringStats {
    pub gp: AllocateRegistersStats,
    pub fp: AllocateRegistersStats,
}

impl GraphColoringStats {
    pub fn bank(&self, bank: Bank) -> &AllocateRegistersStats {
        match bank {
            Bank::GP => &self.gp,
            Bank::FP => &self.fp,
        }
    }

    fn bank_mut(&mut self, bank: Bank) -> &mut AllocateRegistersStats {
        match bank {
            Bank::GP => &mut self.gp,
            Bank::FP => &mut self.fp,
        }
    }
}

impl fmt::Display for GraphColoringStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.gp)?;
        write!(f, "{}", self.fp)
    }
}

pub struct GraphColoringRegisterAllocation<'a> {
    use_counts: &'a UseCounts,
    stats: GraphColoringStats,
}

impl<'a> GraphColoringRegisterAllocation<'a> {
    pub fn new(use_counts: &'a UseCounts) -> Self {
        Self {
            use_counts,
            stats: GraphColoringStats {
                gp: AllocateRegistersStats::new(Bank::GP),
                fp: AllocateRegistersStats::new(Bank::FP),
            },
        }
    }

    pub fn run(mut self, code: &mut Code) -> Result<GraphColoringStats> {
        pad_interference(code);

        for bank in [Bank::GP, Bank::FP] {
            self.stats.bank_mut(bank).num_tmps_in = code.num_tmps(bank);
        }

        self.allocate_on_bank(code, Bank::GP)?;
        self.allocate_on_bank(code, Bank::FP)?;

        fix_spills_after_terminals(code);

        for bank in [Bank::GP, Bank::FP] {
            self.stats.bank_mut(bank).num_tmps_out = code.num_tmps(bank);
        }

        Ok(self.stats)
    }

    fn allocate_on_bank(&mut self, code: &mut Code, bank: Bank) -> Result<()> {
        let use_counts = self.use_counts;
        let stats = self.stats.bank_mut(bank);

        let mut unspillable_tmps = compute_unspillable_tmps(code, bank, stats);

        // Every round that spills makes at least one more tmp unspillable, so this is only
        // reached if a round spilled nothing new.
        let max_iterations = code.num_tmps(bank) + 2;
        let mut tmp_width = TmpWidth::new();

        loop {
            stats.num_iterations += 1;
            if stats.num_iterations > max_iterations {
                return Err(AirError::NoFixpoint {
                    bank,
                    iterations: stats.num_iterations - 1,
                });
            }

            log::debug!(
                "{} allocation, iteration {} over {} tmps",
                bank,
                stats.num_iterations,
                code.num_tmps(bank)
            );
            if code.options.dump_air_at_each_phase {
                log::debug!("{}", code);
            }

            tmp_width.recompute(code, bank);

            let num_tmps = code.num_tmps(bank);
            let done = if num_tmps < MAX_SIZE_FOR_SMALL_INTERFERENCE_GRAPH {
                allocate_with_graph::<SmallInterferenceGraph>(
                    code,
                    bank,
                    &tmp_width,
                    use_counts,
                    &mut unspillable_tmps,
                    stats,
                )
            } else if Tmp::absolute_index_for_tmp_count(num_tmps) <= u16::MAX as usize {
                // Every absolute index, registers included, has to fit the narrow index type.
                allocate_with_graph::<LargeInterferenceGraph>(
                    code,
                    bank,
                    &tmp_width,
                    use_counts,
                    &mut unspillable_tmps,
                    stats,
                )
            } else {
                allocate_with_graph::<HugeInterferenceGraph>(
                    code,
                    bank,
                    &tmp_width,
                    use_counts,
                    &mut unspillable_tmps,
                    stats,
                )
            };

            if done {
                break;
            }
        }

        log::debug!("{}", stats);
        Ok(())
    }
}

fn allocate_with_graph<G: InterferenceGraph + 'static>(
    code: &mut Code,
    bank: Bank,
    tmp_width: &TmpWidth,
    use_counts: &UseCounts,
    unspillable_tmps: &mut BitVector,
    stats: &mut AllocateRegistersStats,
) -> bool {
    // The allocator keeps reading the tmps that were unspillable when it was built while the
    // spiller marks new ones.
    let unspillable_at_build = unspillable_tmps.clone();

    match code.options.allocator_kind() {
        AllocatorKind::Briggs => allocate_round::<Briggs<'_, G>>(
            code,
            bank,
            tmp_width,
            use_counts,
            &unspillable_at_build,
            unspillable_tmps,
            stats,
        ),
        AllocatorKind::Irc => allocate_round::<Irc<'_, G>>(
            code,
            bank,
            tmp_width,
            use_counts,
            &unspillable_at_build,
            unspillable_tmps,
            stats,
        ),
    }
}

/// Returns true once every tmp of `bank` has been replaced by a register.
fn allocate_round<'a, S: ColoringStrategy<'a>>(
    code: &mut Code,
    bank: Bank,
    tmp_width: &'a TmpWidth,
    use_counts: &'a UseCounts,
    unspillable_at_build: &'a BitVector,
    unspillable_tmps: &mut BitVector,
    stats: &mut AllocateRegistersStats,
) -> bool {
    let mut allocator =
        ColoringAllocator::<S>::new(code, bank, tmp_width, use_counts, unspillable_at_build);
    allocator.allocate();

    if log::log_enabled!(log::Level::Trace) {
        let mut dot = String::new();
        if allocator.dump_interference_graph_in_dot(&mut dot).is_ok() {
            log::trace!("Interference graph:\n{}", dot);
        }
    }

    if !allocator.requires_spilling() {
        assign_registers_to_tmp(code, &allocator);
        return true;
    }

    log::debug!(
        "{} allocation spills {} tmps",
        bank,
        allocator.spilled_tmps().count()
    );
    add_spill_and_fill(
        code,
        &allocator,
        tmp_width,
        use_counts,
        unspillable_tmps,
        stats,
    );
    false
}

/// Replaces every tmp of `code` by a register, spilling to the stack where needed.
///
/// The code is validated first. Allocation itself only fails if a bank does not reach a fixpoint.
pub fn allocate_registers_by_graph_coloring(code: &mut Code) -> Result<GraphColoringStats> {
    code.validate()?;
    code.reset_reachability();

    log::debug!(
        "Allocating registers for {} GP and {} FP tmps with {:?}",
        code.num_tmps(Bank::GP),
        code.num_tmps(Bank::FP),
        code.options.allocator_kind()
    );
    if code.options.dump_air_at_each_phase {
        log::debug!("Before graph coloring:\n{}", code);
    }

    let use_counts = UseCounts::new(code);
    let stats = GraphColoringRegisterAllocation::new(&use_counts).run(code)?;

    if code.options.dump_air_at_each_phase {
        log::debug!("After graph coloring:\n{}", code);
    }
    log::debug!("Graph coloring done:\n{}", stats);

    Ok(stats)
}
