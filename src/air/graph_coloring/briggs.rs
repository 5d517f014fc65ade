use std::ops::{Deref, DerefMut};

use crate::utils::interference_graph::{IndexType, InterferenceGraph};

use super::{
    coloring::{for_each_adjacent, ColoringCore, ColoringStrategy, IndexOf, ASSERT_INVARIANTS},
    moves::{MoveSet, MoveSetTrait, INVALID_MOVE},
};

/// Briggs' optimistic allocator: every move that can be conservatively coalesced is coalesced
/// upfront, then the graph is simplified and colored.
pub struct Briggs<'a, G: InterferenceGraph> {
    core: ColoringCore<'a, G>,
    worklist_moves: MoveSet,
}

impl<'a, G: InterferenceGraph + 'a> ColoringStrategy<'a> for Briggs<'a, G> {
    type Graph = G;
    type MoveList = MoveSet;

    fn new(core: ColoringCore<'a, G>) -> Self {
        Self {
            core,
            worklist_moves: MoveSet::new(),
        }
    }

    fn worklist_moves_mut(&mut self) -> &mut MoveSet {
        &mut self.worklist_moves
    }

    fn allocate(&mut self) {
        self.coalesce_to_fixpoint(false);
        self.coalesce_to_fixpoint(true);

        // Nodes with degree >= k start on the spill worklist and nodes with degree < k on the
        // simplify worklist. Since all coalescing is done by now, nodes only ever move from the
        // spill worklist to the simplify worklist. Once on the select stack, a node is no longer
        // part of the graph.
        self.make_initial_worklist();
        self.check_invariants();

        loop {
            let mut changed = false;

            while !self.simplify_worklist.is_empty() {
                self.simplify();
                self.check_invariants();
            }

            if !self.spill_worklist.is_empty() {
                self.select_spill();
                changed = true;
                debug_assert_eq!(self.simplify_worklist.len(), 1);
            }

            if !changed {
                break;
            }
        }

        debug_assert!(self.simplify_worklist.is_empty());
        debug_assert!(self.spill_worklist.is_empty());
        if cfg!(debug_assertions) {
            for index in self.last_precolored_register_index + 1..self.degrees.len() {
                debug_assert!(
                    self.has_been_simplified(index) || self.unspillable_tmps.get(index),
                    "{} was never simplified",
                    self.tmp_for_index(index)
                );
            }
        }

        self.assign_colors();
    }
}

impl<'a, G: InterferenceGraph + 'a> Briggs<'a, G> {
    fn check_invariants(&self) {
        if ASSERT_INVARIANTS {
            self.core.assert_invariants(|_| false);
        }
    }

    /// Runs over one of the move lists until no move coalesces anymore.
    fn coalesce_to_fixpoint(&mut self, low_priority: bool) {
        loop {
            let mut changed = false;

            let len = if low_priority {
                self.worklist_moves.low_priority_len()
            } else {
                self.worklist_moves.len()
            };

            for position in 0..len {
                let move_index = if low_priority {
                    self.worklist_moves.low_priority_move_at(position)
                } else {
                    self.worklist_moves.move_at(position)
                };
                if move_index == INVALID_MOVE {
                    continue;
                }

                let (coalesced, retire) = self.coalesce(move_index);
                changed |= coalesced;
                if retire {
                    if low_priority {
                        self.worklist_moves.retire_low_priority_move_at(position);
                    } else {
                        self.worklist_moves.retire_move_at(position);
                    }
                }
            }

            if !changed {
                break;
            }
        }
    }

    fn select_spill(&mut self) {
        let victim_index = self.core.select_spill();
        self.spill_worklist.quick_clear(victim_index);
        self.simplify_worklist.push(IndexOf::<G>::from_index(victim_index));
    }

    /// Returns whether the move was coalesced and whether it never needs to be looked at again.
    fn coalesce(&mut self, move_index: usize) -> (bool, bool) {
        let (src, dst) = self.move_operands(move_index);
        let mut u = self.get_alias(src);
        let mut v = self.get_alias(dst);

        if self.is_precolored(v) {
            std::mem::swap(&mut u, &mut v);
        }

        if u == v {
            log::trace!("Move {} is already coalesced", move_index);
            return (false, false);
        }

        if self.is_precolored(v) || self.has_interference_edge(u, v) {
            // No coalescing will ever remove the interference.
            if self.is_precolored(v) {
                debug_assert!(self.is_precolored(u));
            }
            log::trace!(
                "Move {} between {} and {} is constrained",
                move_index,
                self.tmp_for_index(u),
                self.tmp_for_index(v)
            );
            return (false, true);
        }

        if self.can_be_safely_coalesced(u, v) {
            log::trace!(
                "Coalescing {} into {}",
                self.tmp_for_index(v),
                self.tmp_for_index(u)
            );
            self.combine(u, v);
            self.has_coalesced_non_trivial_move = true;
            return (true, true);
        }

        self.add_bias(u, v);
        (false, false)
    }

    fn combine(&mut self, u: usize, v: usize) {
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
    }

    fn make_initial_worklist(&mut self) {
        self.simplify_worklist.clear();
        self.spill_worklist.clear_all();

        let register_count = self.register_count() as u32;

        for index in self.last_precolored_register_index + 1..self.degrees.len() {
            if self.has_been_simplified(index) {
                continue;
            }

            let degree = self.degrees[index];
            if degree < register_count {
                log::trace!(
                    "Adding {} with degree {} to the simplify worklist",
                    self.tmp_for_index(index),
                    degree
                );
                self.simplify_worklist.push(IndexOf::<G>::from_index(index));
            } else {
                log::trace!(
                    "Adding {} with degree {} to the spill worklist",
                    self.tmp_for_index(index),
                    degree
                );
                self.add_to_spill(index);
            }
        }
    }

    /// Takes a low-degree node out of the graph. It can always be colored later since it has
    /// fewer neighbors than there are colors.
    fn simplify(&mut self) {
        let Some(last_index) = self.simplify_worklist.pop() else {
            return;
        };
        let last_index = last_index.index();

        debug_assert!(!self.is_on_select_stack.quick_get(last_index));
        debug_assert!(!self.spill_worklist.contains(last_index));
        self.select_stack.push(IndexOf::<G>::from_index(last_index));
        self.is_on_select_stack.quick_set(last_index, true);
        log::trace!("Simplifying {}", self.tmp_for_index(last_index));

        for_each_adjacent(self, last_index, |this, adjacent| {
            this.decrement_degree_in_simplification(adjacent);
        });
    }

    fn decrement_degree(&mut self, tmp_index: usize) {
        if self.is_precolored(tmp_index) {
            return;
        }
        debug_assert_ne!(self.degrees[tmp_index], 0);
        self.degrees[tmp_index] -= 1;
    }

    fn decrement_degree_in_simplification(&mut self, tmp_index: usize) {
        if self.is_precolored(tmp_index) {
            return;
        }
        debug_assert_ne!(self.degrees[tmp_index], 0);
        let old_degree = self.degrees[tmp_index];
        self.degrees[tmp_index] = old_degree - 1;

        if old_degree == self.register_count() as u32 {
            log::trace!(
                "Moving {} from the spill worklist to the simplify worklist",
                self.tmp_for_index(tmp_index)
            );
            self.spill_worklist.quick_clear(tmp_index);
            debug_assert!(!self
                .simplify_worklist
                .contains(&IndexOf::<G>::from_index(tmp_index)));
            self.simplify_worklist.push(IndexOf::<G>::from_index(tmp_index));
        }
    }

    fn assign_colors(&mut self) {
        self.worklist_moves.clear();
        self.core.assign_colors();
    }
}

impl<'a, G: InterferenceGraph> Deref for Briggs<'a, G> {
    type Target = ColoringCore<'a, G>;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

impl<'a, G: InterferenceGraph> DerefMut for Briggs<'a, G> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.core
    }
}
