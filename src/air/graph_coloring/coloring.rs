//! State and primitives shared by the Briggs and IRC allocators.
//!
//! Nodes are the absolute indices of one bank's tmps: index 0 is unused, indices up to
//! [`Tmp::last_machine_register_index`] are the precolored machine registers, and everything
//! above is a temporary.

use std::fmt;
use std::ops::DerefMut;

use indexmap::{IndexMap, IndexSet};
use tinyvec::TinyVec;

use crate::{
    air::{tmp::Tmp, use_counts::UseCounts},
    bank::Bank,
    jit::{reg::Reg, register_set::RegisterSet},
    utils::{
        bitvector::BitVector,
        interference_graph::{IndexType, InterferenceGraph},
    },
    width::Width,
};

use super::moves::MoveSetTrait;

/// Validate the worklist and degree invariants after every step of the allocators.
pub(super) const ASSERT_INVARIANTS: bool = cfg!(test);

pub(super) type IndexOf<G> = <G as InterferenceGraph>::IndexType;

/// Instead of keeping track of the move instructions, we just keep their operands around and use
/// the index in `coalescing_candidates` as the identifier of the move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOperands<I> {
    pub src_index: I,
    pub dst_index: I,
}

pub struct ColoringCore<'a, G: InterferenceGraph> {
    pub(super) bank: Bank,
    pub(super) regs_in_priority_order: Vec<Reg>,
    pub(super) last_precolored_register_index: usize,

    pub(super) interference_edges: G,
    pub(super) adjacency_list: Vec<TinyVec<[IndexOf<G>; 4]>>,
    pub(super) degrees: Vec<u32>,

    pub(super) biases: IndexMap<usize, IndexSet<usize>>,

    pub(super) coalescing_candidates: Vec<MoveOperands<IndexOf<G>>>,
    /// Every move a tmp takes part in.
    pub(super) move_list: Vec<IndexSet<usize>>,

    pub(super) colored_tmp: Vec<Option<Reg>>,
    pub(super) spilled_tmps: Vec<IndexOf<G>>,

    /// Tmp a node was merged into, 0 if the node is its own alias.
    pub(super) coalesced_tmps: Vec<IndexOf<G>>,

    pub(super) is_on_select_stack: BitVector,
    pub(super) select_stack: Vec<IndexOf<G>>,

    /// Low-degree, non-move-related.
    pub(super) simplify_worklist: Vec<IndexOf<G>>,
    /// High-degree.
    pub(super) spill_worklist: BitVector,

    pub(super) has_selected_spill: bool,
    pub(super) has_coalesced_non_trivial_move: bool,

    /// Aliases for the moves that were coalesced before the first spill was selected. Those
    /// coalescings stay valid after spilling.
    pub(super) coalesced_tmps_at_spill: Vec<IndexOf<G>>,

    pub(super) unspillable_tmps: &'a BitVector,
    pub(super) use_counts: &'a UseCounts,

    pub(super) pinned_regs: TinyVec<[Tmp; 4]>,
}

impl<'a, G: InterferenceGraph> ColoringCore<'a, G> {
    /// Creates an empty graph over `tmp_array_size` nodes. Precolored registers are part of the
    /// node space but only the registers listed in `regs_in_priority_order` are handed out as
    /// colors.
    pub fn new(
        bank: Bank,
        regs_in_priority_order: Vec<Reg>,
        tmp_array_size: usize,
        unspillable_tmps: &'a BitVector,
        use_counts: &'a UseCounts,
    ) -> Self {
        let last_precolored_register_index = Tmp::last_machine_register_index();
        assert!(tmp_array_size > last_precolored_register_index);

        let mut interference_edges = G::default();
        interference_edges.set_max_index(tmp_array_size);

        let mut this = Self {
            bank,
            regs_in_priority_order,
            last_precolored_register_index,
            interference_edges,
            adjacency_list: vec![TinyVec::new(); tmp_array_size],
            degrees: Vec::new(),
            biases: IndexMap::new(),
            coalescing_candidates: Vec::new(),
            move_list: vec![IndexSet::new(); tmp_array_size],
            colored_tmp: Vec::new(),
            spilled_tmps: Vec::new(),
            coalesced_tmps: vec![IndexOf::<G>::default(); tmp_array_size],
            is_on_select_stack: BitVector::with_capacity(tmp_array_size),
            select_stack: Vec::new(),
            simplify_worklist: Vec::new(),
            spill_worklist: BitVector::with_capacity(tmp_array_size),
            has_selected_spill: false,
            has_coalesced_non_trivial_move: false,
            coalesced_tmps_at_spill: Vec::new(),
            unspillable_tmps,
            use_counts,
            pinned_regs: TinyVec::new(),
        };

        this.initialize_degrees(tmp_array_size);
        this.initialize_precolored_tmp();

        if log::log_enabled!(log::Level::Trace) {
            let unspillable = unspillable_tmps
                .iter()
                .map(|index| this.tmp_for_index(index).to_string())
                .collect::<Vec<_>>();
            log::trace!("Unspillable tmps: [{}]", unspillable.join(", "));
        }

        this
    }

    /// All precolored registers have an "infinite" degree.
    fn initialize_degrees(&mut self, tmp_array_size: usize) {
        self.degrees.clear();
        self.degrees.resize(tmp_array_size, 0);

        let first_non_reg_index = self.last_precolored_register_index + 1;
        for degree in self.degrees[..first_non_reg_index].iter_mut() {
            *degree = u32::MAX;
        }
    }

    fn initialize_precolored_tmp(&mut self) {
        self.colored_tmp.clear();
        self.colored_tmp
            .resize(self.last_precolored_register_index + 1, None);
        for index in 1..=self.last_precolored_register_index {
            let tmp = self.tmp_for_index(index);
            debug_assert!(tmp.is_reg());
            self.colored_tmp[index] = Some(tmp.reg());
        }
    }

    /// Pinned registers are always part of the palette and interfere with every def.
    pub fn add_pinned_reg(&mut self, reg: Reg) {
        debug_assert_eq!(reg.bank(), self.bank);
        debug_assert!(!self.regs_in_priority_order.contains(&reg));
        self.pinned_regs.push(Tmp::from_reg(reg));
        self.regs_in_priority_order.push(reg);
    }

    pub fn register_count(&self) -> usize {
        self.regs_in_priority_order.len()
    }

    fn k(&self) -> u32 {
        self.register_count() as u32
    }

    pub fn tmp_array_size(&self) -> usize {
        self.adjacency_list.len()
    }

    pub fn bank(&self) -> Bank {
        self.bank
    }

    pub fn tmp_for_index(&self, index: usize) -> Tmp {
        Tmp::tmp_for_absolute_index(self.bank, index)
    }

    pub fn tmp_to_index(&self, tmp: Tmp) -> usize {
        debug_assert_eq!(tmp.bank(), self.bank);
        tmp.absolute_index()
    }

    pub fn is_precolored(&self, tmp_index: usize) -> bool {
        tmp_index <= self.last_precolored_register_index
    }

    pub fn get_alias(&self, tmp_index: usize) -> usize {
        let mut alias = tmp_index;
        loop {
            let next_alias = self.coalesced_tmps[alias].index();
            if next_alias == 0 {
                return alias;
            }
            alias = next_alias;
        }
    }

    pub fn has_interference_edge(&self, u: usize, v: usize) -> bool {
        self.interference_edges
            .contains(IndexOf::<G>::from_index(u), IndexOf::<G>::from_index(v))
    }

    pub fn add_edge(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.add_edge_distinct(a, b);
    }

    fn add_interference_edge(&mut self, a: usize, b: usize) -> bool {
        let is_new_edge = self
            .interference_edges
            .add_and_return_is_new_entry(IndexOf::<G>::from_index(a), IndexOf::<G>::from_index(b));

        if is_new_edge {
            if !self.is_precolored(a) {
                debug_assert!(!self.adjacency_list[a].contains(&IndexOf::<G>::from_index(b)));
                self.adjacency_list[a].push(IndexOf::<G>::from_index(b));
            }
            if !self.is_precolored(b) {
                debug_assert!(!self.adjacency_list[b].contains(&IndexOf::<G>::from_index(a)));
                self.adjacency_list[b].push(IndexOf::<G>::from_index(a));
            }
        }

        is_new_edge
    }

    pub fn add_edge_distinct(&mut self, a: usize, b: usize) {
        debug_assert_ne!(a, b);
        if self.add_interference_edge(a, b) {
            if !self.is_precolored(a) {
                self.degrees[a] += 1;
            }
            if !self.is_precolored(b) {
                self.degrees[b] += 1;
            }
        }
    }

    /// Used while combining, where the caller does the degree bookkeeping.
    pub fn add_edge_distinct_without_degree_change(&mut self, a: usize, b: usize) -> bool {
        debug_assert_ne!(a, b);
        self.add_interference_edge(a, b)
    }

    pub(super) fn record_coalescing_candidate(&mut self, move_index: usize, src: usize, dst: usize) {
        debug_assert_eq!(move_index, self.coalescing_candidates.len());
        self.coalescing_candidates.push(MoveOperands {
            src_index: IndexOf::<G>::from_index(src),
            dst_index: IndexOf::<G>::from_index(dst),
        });
        self.move_list[src].insert(move_index);
        self.move_list[dst].insert(move_index);
    }

    pub(super) fn move_operands(&self, move_index: usize) -> (usize, usize) {
        let operands = self.coalescing_candidates[move_index];
        (operands.src_index.index(), operands.dst_index.index())
    }

    pub(super) fn add_to_spill(&mut self, to_spill: usize) {
        if self.unspillable_tmps.get(to_spill) {
            return;
        }
        self.spill_worklist.quick_set(to_spill, true);
    }

    pub fn has_been_simplified(&self, tmp_index: usize) -> bool {
        if cfg!(debug_assertions) && self.coalesced_tmps[tmp_index].index() != 0 {
            debug_assert_ne!(self.get_alias(tmp_index), tmp_index);
        }

        self.is_on_select_stack.quick_get(tmp_index) || self.coalesced_tmps[tmp_index].index() != 0
    }

    /// Adjacent nodes still in the graph, at the time of the call.
    pub(super) fn live_adjacents(&self, tmp_index: usize) -> TinyVec<[usize; 8]> {
        self.adjacency_list[tmp_index]
            .iter()
            .map(|adjacent| adjacent.index())
            .filter(|&adjacent| !self.has_been_simplified(adjacent))
            .collect()
    }

    pub fn can_be_safely_coalesced(&self, u: usize, v: usize) -> bool {
        debug_assert!(!self.is_precolored(v));
        if self.is_precolored(u) {
            return self.precolored_coalescing_heuristic(u, v);
        }
        self.conservative_heuristic(u, v)
    }

    /// Briggs' conservative coalescing rule: if the combined node has fewer than K neighbors of
    /// degree >= K, every coloring of the graph still has a color left for it.
    pub fn conservative_heuristic(&self, u: usize, v: usize) -> bool {
        debug_assert_ne!(u, v);
        debug_assert!(!self.is_precolored(u));
        debug_assert!(!self.is_precolored(v));

        if self.unspillable_tmps.get(u) != self.unspillable_tmps.get(v) {
            return false;
        }

        let adjacents_of_u = &self.adjacency_list[u];
        let adjacents_of_v = &self.adjacency_list[v];
        let register_count = self.register_count();

        let mut num_candidates = adjacents_of_u.len() + adjacents_of_v.len();
        if num_candidates < register_count {
            return true;
        }

        let mut high_order_adjacents = TinyVec::<[usize; 32]>::new();

        for adjacent in adjacents_of_u.iter().map(|adjacent| adjacent.index()) {
            debug_assert!(adjacent != u && adjacent != v);
            num_candidates -= 1;

            if !self.has_been_simplified(adjacent) && self.degrees[adjacent] >= self.k() {
                debug_assert!(!high_order_adjacents.contains(&adjacent));
                high_order_adjacents.push(adjacent);
                if high_order_adjacents.len() >= register_count {
                    return false;
                }
            } else if high_order_adjacents.len() + num_candidates < register_count {
                return true;
            }
        }
        debug_assert_eq!(num_candidates, adjacents_of_v.len());

        let high_order_adjacents_of_u = high_order_adjacents.len();
        for adjacent in adjacents_of_v.iter().map(|adjacent| adjacent.index()) {
            debug_assert!(adjacent != u && adjacent != v);
            num_candidates -= 1;

            if !self.has_been_simplified(adjacent)
                && self.degrees[adjacent] >= self.k()
                && !high_order_adjacents[..high_order_adjacents_of_u].contains(&adjacent)
            {
                high_order_adjacents.push(adjacent);
                if high_order_adjacents.len() >= register_count {
                    return false;
                }
            } else if high_order_adjacents.len() + num_candidates < register_count {
                return true;
            }
        }

        debug_assert_eq!(num_candidates, 0);
        true
    }

    /// If any high-degree neighbor of the uncolored node does not already interfere with the
    /// precolored node, it may need that node's color, so merging could make the graph
    /// uncolorable.
    pub fn precolored_coalescing_heuristic(&self, u: usize, v: usize) -> bool {
        debug_assert!(self.is_precolored(u));
        debug_assert!(!self.is_precolored(v));

        self.adjacency_list[v]
            .iter()
            .map(|adjacent| adjacent.index())
            .all(|adjacent| {
                self.is_precolored(adjacent)
                    || self.has_been_simplified(adjacent)
                    || self.degrees[adjacent] < self.k()
                    || self.has_interference_edge(u, adjacent)
            })
    }

    /// Biased coloring, section 5.3.3 of Briggs' thesis. A move whose coalescing was refused
    /// still records that `u` and `v` would like the same register; color assignment honors it
    /// when legal.
    pub fn add_bias(&mut self, u: usize, v: usize) {
        if !self.is_precolored(u) {
            self.biases.entry(u).or_default().insert(v);
        }
        if !self.is_precolored(v) {
            self.biases.entry(v).or_default().insert(u);
        }
    }

    /// Picks the node on the spill worklist that is the cheapest to keep out of a register.
    ///
    /// # Panics
    ///
    /// Panics if the spill worklist is empty or the chosen victim is unspillable.
    pub fn select_spill(&mut self) -> usize {
        if !self.has_selected_spill {
            self.has_selected_spill = true;
            if self.has_coalesced_non_trivial_move {
                self.coalesced_tmps_at_spill = self.coalesced_tmps.clone();
            }
        }

        let mut iterator = self.spill_worklist.iter().peekable();
        let mut victim_index = *iterator
            .peek()
            .expect("select_spill() called when there was no spill");
        assert!(
            !self.unspillable_tmps.get(victim_index),
            "trying to spill unspillable tmp"
        );

        let mut max_score = 0.0f32;
        for tmp_index in iterator {
            let uses = self.use_counts.num_warm_uses_and_defs(self.bank, tmp_index);
            if uses == 0.0 {
                victim_index = tmp_index;
                break;
            }

            // Higher score means more desirable to spill.
            let mut tmp_score = self.degrees[tmp_index] as f32 / uses;

            // Constants can be rematerialized.
            if self.use_counts.is_const_def(self.bank, tmp_index) {
                tmp_score *= 2.0;
            }

            if tmp_score > max_score {
                victim_index = tmp_index;
                max_score = tmp_score;
            }
        }

        assert!(!self.unspillable_tmps.get(victim_index));
        debug_assert!(!self.is_precolored(victim_index));
        log::trace!(
            "Selecting spill {}({})",
            victim_index,
            self.tmp_for_index(victim_index)
        );

        victim_index
    }

    /// Pops the select stack and gives every node a register that none of its neighbors has,
    /// preferring the registers of its biases. Nodes without a free register are spilled.
    pub fn assign_colors(&mut self) {
        debug_assert!(self.simplify_worklist.is_empty());
        debug_assert!(self.spill_worklist.is_empty());

        // Reclaim as much memory as possible.
        self.interference_edges.clear();
        self.degrees.clear();
        self.move_list.clear();
        self.simplify_worklist.clear();
        self.spill_worklist.clear_all();

        self.colored_tmp.resize(self.adjacency_list.len(), None);

        let now_aliased_biases = self
            .biases
            .keys()
            .copied()
            .filter(|&key| key != self.get_alias(key))
            .collect::<Vec<_>>();
        for key in now_aliased_biases {
            if let Some(keys_biases) = self.biases.shift_remove(&key) {
                let alias = self.get_alias(key);
                self.biases.entry(alias).or_default().extend(keys_biases);
            }
        }

        while let Some(tmp_index) = self.select_stack.pop() {
            let tmp_index = tmp_index.index();
            debug_assert!(!self.is_precolored(tmp_index));
            debug_assert!(self.colored_tmp[tmp_index].is_none());
            debug_assert_eq!(self.get_alias(tmp_index), tmp_index);

            let mut colored_registers = RegisterSet::new();
            for adjacent in self.adjacency_list[tmp_index].iter() {
                let alias = self.get_alias(adjacent.index());
                debug_assert!(!self.is_precolored(alias) || self.colored_tmp[alias].is_some());
                if let Some(reg) = self.colored_tmp[alias] {
                    colored_registers.add(reg, Width::W64);
                }
            }

            let biased_color = self.biases.get(&tmp_index).and_then(|biases| {
                biases
                    .iter()
                    .filter_map(|&desired_bias| self.colored_tmp[self.get_alias(desired_bias)])
                    .find(|&desired_color| !colored_registers.contains(desired_color))
            });

            let color = biased_color.or_else(|| {
                self.regs_in_priority_order
                    .iter()
                    .copied()
                    .find(|&reg| !colored_registers.contains(reg))
            });

            match color {
                Some(reg) => self.colored_tmp[tmp_index] = Some(reg),
                None => self.spilled_tmps.push(IndexOf::<G>::from_index(tmp_index)),
            }
        }

        self.is_on_select_stack.clear_all();

        if self.spilled_tmps.is_empty() {
            self.coalesced_tmps_at_spill.clear();
        } else {
            self.colored_tmp.clear();
        }
    }

    pub fn requires_spilling(&self) -> bool {
        !self.spilled_tmps.is_empty()
    }

    pub fn spilled_tmps(&self) -> impl Iterator<Item = Tmp> + '_ {
        self.spilled_tmps
            .iter()
            .map(|index| self.tmp_for_index(index.index()))
    }

    /// Color of a node after a successful allocation.
    ///
    /// # Panics
    ///
    /// Panics if the node has no color.
    pub fn color(&self, tmp_index: usize) -> Reg {
        match self.colored_tmp.get(tmp_index).copied().flatten() {
            Some(reg) => reg,
            None => panic!("no color for {}", self.tmp_for_index(tmp_index)),
        }
    }

    /// Follows the aliases recorded before the first spill was selected.
    pub fn get_alias_at_spill(&self, tmp_index: usize) -> usize {
        if self.coalesced_tmps_at_spill.is_empty() {
            return tmp_index;
        }

        let mut alias = tmp_index;
        loop {
            let next_alias = self.coalesced_tmps_at_spill[alias].index();
            if next_alias == 0 {
                return alias;
            }
            alias = next_alias;
        }
    }

    /// Renders the interference graph in Graphviz dot form. Degrees are printed while they are
    /// still tracked, so before colors are assigned.
    pub fn dump_interference_graph_in_dot(&self, out: &mut impl fmt::Write) -> fmt::Result {
        writeln!(out, "graph InterferenceGraph {{ ")?;

        let mut tmps_with_interferences = IndexSet::new();
        self.interference_edges.for_each(|u, v| {
            tmps_with_interferences.insert(self.tmp_for_index(u.index()));
            tmps_with_interferences.insert(self.tmp_for_index(v.index()));
        });

        for &tmp in tmps_with_interferences.iter() {
            let tmp_index = tmp.absolute_index();
            match self.degrees.get(tmp_index) {
                Some(degree) => writeln!(
                    out,
                    "    {} [label=\"{} ({})\"];",
                    tmp.internal_value(),
                    tmp,
                    degree
                )?,
                None => writeln!(out, "    {} [label=\"{}\"];", tmp.internal_value(), tmp)?,
            }
        }

        let mut result = Ok(());
        self.interference_edges.for_each(|u, v| {
            if result.is_ok() {
                result = writeln!(
                    out,
                    "    {} -- {};",
                    self.tmp_for_index(u.index()),
                    self.tmp_for_index(v.index())
                );
            }
        });
        result?;

        writeln!(out, "}}")
    }

    /// Checks the degree invariant and that every node still in the graph sits in the worklist
    /// its degree calls for. `in_freeze_worklist` answers for the IRC freeze worklist.
    pub(super) fn assert_invariants(&self, in_freeze_worklist: impl Fn(usize) -> bool) {
        let k = self.k();
        for index in self.last_precolored_register_index + 1..self.degrees.len() {
            if self.get_alias(index) != index {
                assert!(!self.spill_worklist.contains(index));
                continue;
            }
            if self.is_on_select_stack.contains(index) {
                assert!(!self.simplify_worklist.contains(&IndexOf::<G>::from_index(index)));
                assert!(!self.spill_worklist.contains(index));
                assert!(!in_freeze_worklist(index));
                continue;
            }

            let live_degree = self.live_adjacents(index).len() as u32;
            assert_eq!(
                self.degrees[index], live_degree,
                "stale degree for {}",
                self.tmp_for_index(index)
            );

            let on_simplify = self
                .simplify_worklist
                .contains(&IndexOf::<G>::from_index(index));
            let on_spill = self.spill_worklist.contains(index);
            let on_freeze = in_freeze_worklist(index);
            let memberships = on_simplify as u32 + on_spill as u32 + on_freeze as u32;

            if self.degrees[index] >= k {
                assert!(!on_freeze);
                if !self.has_selected_spill {
                    assert!(!on_simplify);
                    assert!(on_spill || self.unspillable_tmps.get(index));
                }
            } else {
                assert!(!on_spill);
            }
            assert!(memberships <= 1, "{} is on several worklists", self.tmp_for_index(index));
        }
    }
}

/// Walks the neighbors of `tmp_index` that are still in the graph. The adjacency list of
/// `tmp_index` itself must not change during the walk.
pub(super) fn for_each_adjacent<'a, G, S>(
    this: &mut S,
    tmp_index: usize,
    mut function: impl FnMut(&mut S, usize),
) where
    G: InterferenceGraph + 'a,
    S: DerefMut<Target = ColoringCore<'a, G>>,
{
    let mut position = 0;
    while position < this.adjacency_list[tmp_index].len() {
        let adjacent = this.adjacency_list[tmp_index][position].index();
        if !this.has_been_simplified(adjacent) {
            function(this, adjacent);
        }
        position += 1;
    }
}

/// One way of driving the shared core to a colored graph.
pub trait ColoringStrategy<'a>: DerefMut<Target = ColoringCore<'a, Self::Graph>> + Sized {
    type Graph: InterferenceGraph + 'a;
    type MoveList: MoveSetTrait;

    fn new(core: ColoringCore<'a, Self::Graph>) -> Self;

    fn worklist_moves_mut(&mut self) -> &mut Self::MoveList;

    /// Simplifies, coalesces and spills until every node is colored or spilled.
    fn allocate(&mut self);

    fn add_move(&mut self, src: usize, dst: usize) -> usize {
        let move_index = self.worklist_moves_mut().add_move();
        self.record_coalescing_candidate(move_index, src, dst);
        move_index
    }

    fn start_adding_low_priority_moves(&mut self) {
        self.worklist_moves_mut().start_adding_low_priority_moves();
    }

    fn add_low_priority_move(&mut self, src: usize, dst: usize) -> usize {
        let move_index = self.worklist_moves_mut().add_low_priority_move();
        self.record_coalescing_candidate(move_index, src, dst);
        move_index
    }
}
