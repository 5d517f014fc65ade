//! # Assembly IR (AIR)
//!
//! The IR the allocator works on. After allocation a procedure is an assembly instruction
//! sequence over machine registers, immediates and stack slots. Before allocation it also names
//! abstract registers (Tmps): a [`Tmp`](tmp::Tmp) is either an unallocated temporary or a machine
//! register.
//!
//! Instructions are an [`Opcode`](opcode::Opcode) plus operands. An opcode may have several
//! overloads, one per operand count, and each overload has a form: the role, bank and width of
//! every operand. The register allocator only ever looks at instructions through their forms.

pub mod arg;
pub mod basic_block;
pub mod code;
pub mod fix_spills_after_terminals;
pub mod graph_coloring;
pub mod insertion_set;
pub mod inst;
pub mod liveness_adapter;
pub mod opcode;
pub mod pad_interference;
pub mod stack_slot;
pub mod tmp;
pub mod tmp_width;
pub mod use_counts;
