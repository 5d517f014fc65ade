#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion<T> {
    pub index: usize,
    pub element: T,
}

impl<T> Insertion<T> {
    pub fn new(index: usize, value: T) -> Self {
        Self {
            index,
            element: value,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn element(&self) -> &T {
        &self.element
    }
}

/// Inserts every element of `insertions` in front of the target element at its index, in one pass.
/// An index equal to `target.len()` appends. Insertions at the same index keep their relative
/// order. Returns the number of inserted elements.
pub fn execute_insertions<T>(target: &mut Vec<T>, insertions: &mut Vec<Insertion<T>>) -> usize {
    let num_insertions = insertions.len();

    if num_insertions == 0 {
        return 0;
    }

    insertions.sort_by_key(|insertion| insertion.index);
    debug_assert!(insertions
        .last()
        .map_or(true, |insertion| insertion.index <= target.len()));

    let mut result = Vec::with_capacity(target.len() + num_insertions);
    let mut pending = insertions.drain(..).peekable();

    for (index, element) in std::mem::take(target).into_iter().enumerate() {
        while let Some(insertion) = pending.next_if(|insertion| insertion.index <= index) {
            result.push(insertion.element);
        }
        result.push(element);
    }
    result.extend(pending.map(|insertion| insertion.element));

    *target = result;
    num_insertions
}
