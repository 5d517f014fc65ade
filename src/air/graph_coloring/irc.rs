use std::ops::{Deref, DerefMut};

use indexmap::IndexSet;

use crate::utils::{
    bitvector::BitVector,
    interference_graph::{IndexType, InterferenceGraph},
};

use super::{
    coloring::{for_each_adjacent, ColoringCore, ColoringStrategy, IndexOf, ASSERT_INVARIANTS},
    moves::{MoveSetTrait, OrderedMoveSet},
};

/// Iterated register coalescing (George and Appel). Simplification, coalescing and freezing are
/// interleaved so that moves are only given up on when no progress can be made otherwise.
pub struct Irc<'a, G: InterferenceGraph> {
    core: ColoringCore<'a, G>,
    /// Low-degree, move related.
    freeze_worklist: IndexSet<usize>,
    /// Moves enabled for possible coalescing.
    worklist_moves: OrderedMoveSet,
    /// Moves not yet ready for coalescing.
    active_moves: BitVector,
    /// Tmps whose moves are now ready for possible coalescing.
    moves_to_enable: BitVector,
}

impl<'a, G: InterferenceGraph + 'a> ColoringStrategy<'a> for Irc<'a, G> {
    type Graph = G;
    type MoveList = OrderedMoveSet;

    fn new(core: ColoringCore<'a, G>) -> Self {
        let tmp_array_size = core.tmp_array_size();
        Self {
            core,
            freeze_worklist: IndexSet::new(),
            worklist_moves: OrderedMoveSet::new(),
            active_moves: BitVector::new(),
            moves_to_enable: BitVector::with_capacity(tmp_array_size),
        }
    }

    fn worklist_moves_mut(&mut self) -> &mut OrderedMoveSet {
        &mut self.worklist_moves
    }

    fn allocate(&mut self) {
        self.active_moves
            .ensure_size(self.worklist_moves.total_number_of_moves());
        debug_assert!(self.active_moves.len() >= self.coalescing_candidates.len());

        self.make_worklist();
        self.check_invariants();

        loop {
            if !self.simplify_worklist.is_empty() {
                self.simplify();
            } else if !self.moves_to_enable.is_empty() {
                self.enable_moves();
            } else if !self.worklist_moves.is_empty() {
                self.coalesce();
            } else if !self.freeze_worklist.is_empty() {
                self.freeze();
            } else if !self.spill_worklist.is_empty() {
                self.select_spill();
            }
            self.check_invariants();

            if self.simplify_worklist.is_empty()
                && self.worklist_moves.is_empty()
                && self.freeze_worklist.is_empty()
                && self.spill_worklist.is_empty()
            {
                break;
            }
        }

        self.assign_colors();
    }
}

impl<'a, G: InterferenceGraph + 'a> Irc<'a, G> {
    fn check_invariants(&self) {
        if ASSERT_INVARIANTS {
            self.core
                .assert_invariants(|index| self.freeze_worklist.contains(&index));
        }
    }

    fn make_worklist(&mut self) {
        let register_count = self.register_count() as u32;

        for index in self.last_precolored_register_index + 1..self.degrees.len() {
            if self.degrees[index] >= register_count {
                self.add_to_spill(index);
            } else if !self.move_list[index].is_empty() {
                self.freeze_worklist.insert(index);
            } else {
                self.simplify_worklist.push(IndexOf::<G>::from_index(index));
            }
        }
    }

    fn simplify(&mut self) {
        let Some(last_index) = self.simplify_worklist.pop() else {
            return;
        };
        let last_index = last_index.index();

        debug_assert!(!self.is_on_select_stack.quick_get(last_index));
        self.select_stack.push(IndexOf::<G>::from_index(last_index));
        self.is_on_select_stack.quick_set(last_index, true);
        log::trace!("Simplifying {}", self.tmp_for_index(last_index));

        for_each_adjacent(self, last_index, |this, adjacent| {
            this.decrement_degree(adjacent);
        });
    }

    fn coalesce(&mut self) {
        let move_index = self.worklist_moves.take_last_move();
        let (src, dst) = self.move_operands(move_index);

        let mut u = self.get_alias(src);
        let mut v = self.get_alias(dst);

        if self.is_precolored(v) {
            std::mem::swap(&mut u, &mut v);
        }

        if u == v {
            self.add_worklist(u);
            log::trace!("Move {} is already coalesced", move_index);
        } else if self.is_precolored(v) || self.has_interference_edge(u, v) {
            self.add_worklist(u);
            self.add_worklist(v);
            log::trace!("Move {} is constrained", move_index);
        } else if self.can_be_safely_coalesced(u, v) {
            log::trace!(
                "Coalescing {} into {}",
                self.tmp_for_index(v),
                self.tmp_for_index(u)
            );
            self.combine(u, v);
            self.add_worklist(u);
            self.has_coalesced_non_trivial_move = true;
        } else {
            self.active_moves.quick_set(move_index, true);
            self.add_bias(u, v);
        }
    }

    fn add_worklist(&mut self, tmp_index: usize) {
        if !self.is_precolored(tmp_index)
            && self.degrees[tmp_index] < self.register_count() as u32
            && !self.is_move_related(tmp_index)
        {
            self.freeze_worklist.swap_remove(&tmp_index);
            self.simplify_worklist.push(IndexOf::<G>::from_index(tmp_index));
        }
    }

    fn combine(&mut self, u: usize, v: usize) {
        if !self.freeze_worklist.swap_remove(&v) {
            self.spill_worklist.quick_clear(v);
        }

        debug_assert_eq!(self.coalesced_tmps[v].index(), 0);
        self.coalesced_tmps[v] = IndexOf::<G>::from_index(u);

        let moves_of_v = std::mem::take(&mut self.move_list[v]);
        self.move_list[u].extend(moves_of_v.iter().copied());
        self.move_list[v] = moves_of_v;

        for_each_adjacent(self, v, |this, adjacent| {
            if this.add_edge_distinct_without_degree_change(adjacent, u) {
                // The edge with v moved over to u: the adjacent keeps its degree.
                if !this.is_precolored(u) {
                    this.degrees[u] += 1;
                }
            } else {
                // u already interfered with the adjacent, the edge with v merges into it.
                this.decrement_degree(adjacent);
            }
        });

        if self.degrees[u] >= self.register_count() as u32 && self.freeze_worklist.swap_remove(&u) {
            self.add_to_spill(u);
        }
    }

    fn freeze(&mut self) {
        let Some(victim_index) = self.freeze_worklist.pop() else {
            return;
        };
        debug_assert_eq!(
            self.get_alias(victim_index),
            victim_index,
            "coalescing left an aliased tmp on the freeze worklist"
        );
        log::trace!("Freezing {}", self.tmp_for_index(victim_index));
        self.simplify_worklist.push(IndexOf::<G>::from_index(victim_index));
        self.freeze_moves(victim_index);
    }

    /// Gives up on every pending move of `tmp_index`.
    fn freeze_moves(&mut self, tmp_index: usize) {
        self.for_each_node_moves(tmp_index, |this, move_index| {
            if !this.active_moves.quick_clear(move_index) {
                this.worklist_moves.take_move(move_index);
            }

            let (src, dst) = this.move_operands(move_index);
            let original_other_tmp = if src != tmp_index { src } else { dst };
            let other_tmp_index = this.get_alias(original_other_tmp);

            if this.degrees[other_tmp_index] < this.register_count() as u32
                && !this.is_move_related(other_tmp_index)
                && this.freeze_worklist.swap_remove(&other_tmp_index)
            {
                this.simplify_worklist
                    .push(IndexOf::<G>::from_index(other_tmp_index));
            }
        });
    }

    fn decrement_degree(&mut self, tmp_index: usize) {
        if self.is_precolored(tmp_index) {
            return;
        }
        debug_assert_ne!(self.degrees[tmp_index], 0);
        let old_degree = self.degrees[tmp_index];
        self.degrees[tmp_index] = old_degree - 1;

        if old_degree == self.register_count() as u32 {
            self.lazy_enable_moves_on_value_and_adjacents(tmp_index);
            self.spill_worklist.quick_clear(tmp_index);

            if self.is_move_related(tmp_index) {
                self.freeze_worklist.insert(tmp_index);
            } else {
                self.simplify_worklist.push(IndexOf::<G>::from_index(tmp_index));
            }
        }
    }

    fn select_spill(&mut self) {
        let victim_index = self.core.select_spill();
        self.spill_worklist.quick_clear(victim_index);
        self.freeze_moves(victim_index);
        // Pushed last so it is simplified before anything freeze_moves() released can lower its
        // degree and queue it a second time.
        self.simplify_worklist.push(IndexOf::<G>::from_index(victim_index));
    }

    fn assign_colors(&mut self) {
        debug_assert!(self.freeze_worklist.is_empty());
        self.worklist_moves.clear();
        self.core.assign_colors();
    }

    fn is_move_related(&self, tmp_index: usize) -> bool {
        self.move_list[tmp_index].iter().any(|&move_index| {
            self.active_moves.quick_get(move_index) || self.worklist_moves.contains(move_index)
        })
    }

    fn for_each_node_moves(&mut self, tmp_index: usize, mut function: impl FnMut(&mut Self, usize)) {
        let mut position = 0;
        while position < self.move_list[tmp_index].len() {
            let move_index = self.move_list[tmp_index][position];
            if self.active_moves.quick_get(move_index) || self.worklist_moves.contains(move_index) {
                function(self, move_index);
            }
            position += 1;
        }
    }

    fn lazy_enable_moves_on_value_and_adjacents(&mut self, tmp_index: usize) {
        self.moves_to_enable.quick_set(tmp_index, true);
        for_each_adjacent(self, tmp_index, |this, adjacent| {
            this.moves_to_enable.quick_set(adjacent, true);
        });
    }

    fn enable_moves_on_value(&mut self, tmp_index: usize) {
        let mut position = 0;
        while position < self.move_list[tmp_index].len() {
            let move_index = self.move_list[tmp_index][position];
            if self.active_moves.quick_clear(move_index) {
                self.worklist_moves.return_move(move_index);
            }
            position += 1;
        }
    }

    fn enable_moves(&mut self) {
        let to_enable = self.moves_to_enable.iter().collect::<Vec<_>>();
        for tmp_index in to_enable {
            self.enable_moves_on_value(tmp_index);
        }
        self.moves_to_enable.clear_all();
    }
}

impl<'a, G: InterferenceGraph> Deref for Irc<'a, G> {
    type Target = ColoringCore<'a, G>;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

impl<'a, G: InterferenceGraph> DerefMut for Irc<'a, G> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.core
    }
}
