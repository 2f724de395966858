// Ledger engine
//
// This module contains the core ledger implementation including:
// - Hashing primitive
// - Block structure
// - Proof of work search
// - Chain structure, validation and repair
// - Persistent storage
// - The shared ledger handle driven by the API

pub mod block;
pub mod chain;
pub mod digest;
pub mod ledger;
pub mod pow;
pub mod repair;
pub mod storage;
pub mod validation;

// Re-export main components for easier access
pub use block::Block;
pub use chain::BlockchainError;
pub use ledger::{Ledger, MiningSettings, StatusReport};
pub use repair::RepairReport;
pub use validation::{Violation, ViolationKind};
