// Thin re-export module: implementation is in `blockchain/core.rs`, split into the
// block data type, the owned chain and the stateless validation rules.

pub mod core;
pub use self::core::*;
