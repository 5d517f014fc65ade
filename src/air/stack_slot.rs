#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum StackSlotKind {
    /// A locked stack slot is an area of stack requested by the client. It cannot be killed and
    /// reads and writes to it behave like any other memory access.
    #[default]
    Locked,

    /// A spill slot, created by register allocation for a temporary that did not get a register.
    /// A 32-bit ZDef store to an 8 byte spill slot zeroes the top 4 bytes.
    Spill,
}

#[derive(Debug, Clone)]
pub struct StackSlot {
    pub byte_size: u32,
    pub kind: StackSlotKind,
    pub index: usize,
    pub offset_from_fp: isize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StackSlotId(pub usize);

impl From<usize> for StackSlotId {
    fn from(index: usize) -> Self {
        StackSlotId(index)
    }
}

impl From<StackSlotId> for usize {
    fn from(id: StackSlotId) -> Self {
        id.0
    }
}

impl StackSlot {
    pub fn is_spill(&self) -> bool {
        self.kind == StackSlotKind::Spill
    }

    pub fn is_locked(&self) -> bool {
        self.kind == StackSlotKind::Locked
    }

    pub fn kind(&self) -> StackSlotKind {
        self.kind
    }

    pub fn byte_size(&self) -> u32 {
        self.byte_size
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Grows the slot so that it holds at least `size` bytes. Spill slots are only ever widened.
    pub fn ensure_size(&mut self, size: u32) {
        assert_eq!(self.offset_from_fp, 0, "cannot resize a slot that has a frame offset");
        self.byte_size = self.byte_size.max(size);
    }

    pub fn alignment(&self) -> usize {
        if self.byte_size() <= 1 {
            1
        } else if self.byte_size() <= 2 {
            2
        } else if self.byte_size() <= 4 {
            4
        } else {
            8
        }
    }
}

impl std::fmt::Display for StackSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            StackSlotKind::Locked => "locked",
            StackSlotKind::Spill => "spill",
        };
        write!(f, "stack{}: byte_size = {}, kind = {}", self.index, self.byte_size, kind)
    }
}
