//! Graph coloring register allocation for Air.
//!
//! Build a [`Code`](air::code::Code) with tmps, hand it to
//! [`allocate_registers_by_graph_coloring`] and every tmp is replaced by a machine register or a
//! spill slot. Both Briggs' optimistic allocator and iterated register coalescing are available,
//! see [`Options`](options::Options).

pub mod air;
pub mod bank;
pub mod error;
pub mod jit;
pub mod liveness;
pub mod options;
pub mod utils;
pub mod width;

#[cfg(test)]
mod tests;

pub use air::graph_coloring::{
    allocate_registers_by_graph_coloring, AllocateRegistersStats, GraphColoringStats,
};
pub use error::{AirError, Result};
pub use options::{AllocatorKind, Options};
