pub mod reg;
pub mod register_set;
