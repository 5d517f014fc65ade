pub mod bitvector;
pub mod insertion;
pub mod interference_graph;
