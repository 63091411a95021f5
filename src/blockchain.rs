// Thin re-export module: implementation is in `blockchain/core.rs` so the
// ledger can be split into block, chain and validation concerns.

pub mod core;
pub use core::*;
