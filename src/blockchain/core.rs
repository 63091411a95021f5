// core.rs splits ledger responsibilities into submodules: block structure and
// proof-of-work checks, chain management, and transaction-level validation.
pub mod block;
pub mod chain;
pub mod validation;

pub use block::*;
pub use chain::*;
pub use validation::*;
