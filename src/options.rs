cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
        const COALESCE_ALIASING_DEFS_BY_DEFAULT: bool = true;
    } else {
        const COALESCE_ALIASING_DEFS_BY_DEFAULT: bool = false;
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        const DEFAULT_ALLOCATOR: AllocatorKind = AllocatorKind::Briggs;
    } else {
        const DEFAULT_ALLOCATOR: AllocatorKind = AllocatorKind::Irc;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    /// Optimistic coloring with conservative coalescing done upfront.
    Briggs,
    /// Iterated register coalescing.
    Irc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub air_force_briggs_allocator: bool,
    pub air_force_irc_allocator: bool,
    /// Try to give the destination of three-operand commutative arithmetic the same register as
    /// one of its sources. Only profitable on targets whose instructions are two-operand.
    pub air_coalesce_aliasing_defs: bool,
    pub dump_air_at_each_phase: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            air_force_briggs_allocator: false,
            air_force_irc_allocator: false,
            air_coalesce_aliasing_defs: COALESCE_ALIASING_DEFS_BY_DEFAULT,
            dump_air_at_each_phase: false,
        }
    }
}

impl Options {
    pub fn allocator_kind(&self) -> AllocatorKind {
        if self.air_force_briggs_allocator {
            AllocatorKind::Briggs
        } else if self.air_force_irc_allocator {
            AllocatorKind::Irc
        } else {
            DEFAULT_ALLOCATOR
        }
    }
}
