//! Worklists of coalescing candidates.
//!
//! Every candidate gets a dense move index when it is added. High priority moves (real `Move`
//! instructions) are always numbered before low priority ones (operand aliasing hints).

/// What the interference builder needs from a strategy's move worklist.
pub trait MoveSetTrait {
    fn clear(&mut self);
    fn add_move(&mut self) -> usize;
    fn start_adding_low_priority_moves(&mut self);
    fn add_low_priority_move(&mut self) -> usize;
}

/// Sentinel for a move that no longer needs to be looked at.
pub const INVALID_MOVE: usize = usize::MAX;

/// Flat move lists used by the Briggs allocator. Moves are visited in insertion order and
/// retired in place by overwriting them with [`INVALID_MOVE`].
#[derive(Debug, Default)]
pub struct MoveSet {
    position_in_move_list: usize,
    move_list: Vec<usize>,
    low_priority_move_list: Vec<usize>,
}

impl MoveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.move_list.len()
    }

    pub fn low_priority_len(&self) -> usize {
        self.low_priority_move_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.move_list.is_empty() && self.low_priority_move_list.is_empty()
    }

    pub fn move_at(&self, position: usize) -> usize {
        self.move_list[position]
    }

    pub fn low_priority_move_at(&self, position: usize) -> usize {
        self.low_priority_move_list[position]
    }

    pub fn retire_move_at(&mut self, position: usize) {
        self.move_list[position] = INVALID_MOVE;
    }

    pub fn retire_low_priority_move_at(&mut self, position: usize) {
        self.low_priority_move_list[position] = INVALID_MOVE;
    }
}

impl MoveSetTrait for MoveSet {
    fn clear(&mut self) {
        self.position_in_move_list = 0;
        self.move_list.clear();
        self.low_priority_move_list.clear();
    }

    fn add_move(&mut self) -> usize {
        debug_assert!(self.low_priority_move_list.is_empty());

        let next_index = self.position_in_move_list;
        self.position_in_move_list += 1;
        self.move_list.push(next_index);
        next_index
    }

    fn start_adding_low_priority_moves(&mut self) {
        debug_assert!(self.low_priority_move_list.is_empty());
    }

    fn add_low_priority_move(&mut self) -> usize {
        let next_index = self.position_in_move_list;
        self.position_in_move_list += 1;
        self.low_priority_move_list.push(next_index);
        next_index
    }
}

/// Move worklist of the IRC allocator.
///
/// Supports O(1) removal of an arbitrary move and O(1) membership tests through
/// `position_in_move_list`, which maps a move index to its slot in whichever of the two lists
/// holds it (or `usize::MAX` when the move is not in the worklist). `take_last_move` drains the
/// high priority list before touching the low priority one.
#[derive(Debug)]
pub struct OrderedMoveSet {
    position_in_move_list: Vec<usize>,
    move_list: Vec<usize>,
    low_priority_move_list: Vec<usize>,
    /// `usize::MAX` until low priority moves start being added.
    first_low_priority_move_index: usize,
}

impl Default for OrderedMoveSet {
    fn default() -> Self {
        Self {
            position_in_move_list: Vec::new(),
            move_list: Vec::new(),
            low_priority_move_list: Vec::new(),
            first_low_priority_move_index: usize::MAX,
        }
    }
}

impl MoveSetTrait for OrderedMoveSet {
    fn clear(&mut self) {
        self.position_in_move_list.clear();
        self.move_list.clear();
        self.low_priority_move_list.clear();
        self.first_low_priority_move_index = usize::MAX;
    }

    fn add_move(&mut self) -> usize {
        debug_assert!(self.low_priority_move_list.is_empty());
        debug_assert!(self.first_low_priority_move_index == usize::MAX);

        let next_index = self.position_in_move_list.len();
        let position = self.move_list.len();
        self.move_list.push(next_index);
        self.position_in_move_list.push(position);
        next_index
    }

    fn start_adding_low_priority_moves(&mut self) {
        debug_assert!(self.low_priority_move_list.is_empty());
        self.first_low_priority_move_index = self.position_in_move_list.len();
    }

    fn add_low_priority_move(&mut self) -> usize {
        let next_index = self.position_in_move_list.len();
        debug_assert!(
            next_index >= self.first_low_priority_move_index,
            "start_adding_low_priority_moves() was not called"
        );

        let position = self.low_priority_move_list.len();
        self.low_priority_move_list.push(next_index);
        self.position_in_move_list.push(position);
        next_index
    }
}

impl OrderedMoveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.move_list.is_empty() && self.low_priority_move_list.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.position_in_move_list[index] != usize::MAX
    }

    fn list_for(&mut self, move_index: usize) -> &mut Vec<usize> {
        if move_index < self.first_low_priority_move_index {
            &mut self.move_list
        } else {
            &mut self.low_priority_move_list
        }
    }

    /// Removes `move_index` from the worklist if it is there.
    pub fn take_move(&mut self, move_index: usize) {
        let position = self.position_in_move_list[move_index];
        if position == usize::MAX {
            return;
        }

        let list = self.list_for(move_index);
        debug_assert_eq!(list[position], move_index);
        list.swap_remove(position);
        let moved = list.get(position).copied();
        if let Some(moved) = moved {
            self.position_in_move_list[moved] = position;
        }

        self.position_in_move_list[move_index] = usize::MAX;
        debug_assert!(!self.contains(move_index));
    }

    /// Pops a move, high priority moves first.
    ///
    /// # Panics
    ///
    /// Panics if the worklist is empty.
    pub fn take_last_move(&mut self) -> usize {
        let last_index = self
            .move_list
            .pop()
            .or_else(|| self.low_priority_move_list.pop())
            .expect("take_last_move() called on an empty move worklist");

        self.position_in_move_list[last_index] = usize::MAX;
        last_index
    }

    /// Puts back a move that was taken out earlier.
    pub fn return_move(&mut self, index: usize) {
        debug_assert!(!self.contains(index));

        let list = self.list_for(index);
        let position = list.len();
        list.push(index);
        self.position_in_move_list[index] = position;

        debug_assert!(self.contains(index));
    }

    pub fn total_number_of_moves(&self) -> usize {
        self.position_in_move_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_set_numbering() {
        let mut moves = MoveSet::new();
        assert_eq!(moves.add_move(), 0);
        assert_eq!(moves.add_move(), 1);
        moves.start_adding_low_priority_moves();
        assert_eq!(moves.add_low_priority_move(), 2);

        assert_eq!(moves.len(), 2);
        assert_eq!(moves.low_priority_len(), 1);
        moves.retire_move_at(0);
        assert_eq!(moves.move_at(0), INVALID_MOVE);
        assert_eq!(moves.low_priority_move_at(0), 2);

        moves.clear();
        assert!(moves.is_empty());
        assert_eq!(moves.add_move(), 0);
    }

    #[test]
    fn test_ordered_move_set() {
        let mut moves = OrderedMoveSet::new();
        for expected in 0..4 {
            assert_eq!(moves.add_move(), expected);
        }
        moves.start_adding_low_priority_moves();
        assert_eq!(moves.add_low_priority_move(), 4);
        assert_eq!(moves.add_low_priority_move(), 5);
        assert_eq!(moves.total_number_of_moves(), 6);

        moves.take_move(1);
        assert!(!moves.contains(1));
        assert!(moves.contains(3));
        // Taking a move twice is harmless.
        moves.take_move(1);

        moves.take_move(4);
        assert!(!moves.contains(4));
        assert!(moves.contains(5));

        // High priority moves drain first, most recent first.
        let mut taken = vec![];
        while !moves.is_empty() {
            taken.push(moves.take_last_move());
        }
        assert_eq!(taken.len(), 4);
        assert!(taken[..3].iter().all(|&index| index < 4));
        assert_eq!(taken[3], 5);

        moves.return_move(4);
        moves.return_move(2);
        assert!(moves.contains(4) && moves.contains(2));
        assert_eq!(moves.take_last_move(), 2);
        assert_eq!(moves.take_last_move(), 4);
        assert!(moves.is_empty());
    }

    #[test]
    fn test_ordered_move_set_without_low_priority_moves() {
        let mut moves = OrderedMoveSet::new();
        moves.add_move();
        moves.add_move();
        moves.start_adding_low_priority_moves();

        moves.take_move(0);
        moves.return_move(0);
        assert_eq!(moves.take_last_move(), 0);
        assert_eq!(moves.take_last_move(), 1);
    }
}
