use log::warn;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::chain::Chain;
use super::digest;

/// What is wrong with a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// The stored previous hash does not match the recomputed hash of the predecessor
    BrokenLink { expected: String, found: String },

    /// The block's hash does not have enough leading hex zeros
    InsufficientWork { hash: String, difficulty: u32 },

    /// The cached head pointer does not match the hash of the last block
    StaleHead { expected: String, found: String },
}

/// A single integrity failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Violation {
    /// Index of the offending block
    pub index: u64,

    #[serde(flatten)]
    pub kind: ViolationKind,
}

/// Every integrity failure found in one pass over a chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// True when no check failed
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// Indices of blocks with at least one violation, in chain order
    pub fn failing_indices(&self) -> Vec<u64> {
        let mut indices: Vec<u64> = self.violations.iter().map(|v| v.index).collect();
        indices.dedup();
        indices
    }

    fn record(&mut self, index: u64, kind: ViolationKind) {
        warn!("Block {} failed validation: {:?}", index, kind);
        self.violations.push(Violation { index, kind });
    }
}

impl Chain {
    /// Walks the whole chain and reports every integrity failure
    ///
    /// Each block's hash is recomputed from its current fields. Genesis is
    /// checked for proof of work only; every later block is also checked
    /// against its predecessor's recomputed hash. Finally the cached head
    /// pointer is compared against the last block. An empty chain is valid.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        if self.is_empty() {
            return report;
        }

        let mut previous_hash: Option<String> = None;

        for block in &self.blocks {
            let hash = block.calculate_hash();

            if let Some(expected) = previous_hash {
                if block.previous_hash != expected {
                    report.record(
                        block.index,
                        ViolationKind::BrokenLink {
                            expected,
                            found: block.previous_hash.clone(),
                        },
                    );
                }
            }

            if !digest::has_leading_zero_nibbles(&hash, block.difficulty as usize) {
                report.record(
                    block.index,
                    ViolationKind::InsufficientWork {
                        hash: hash.clone(),
                        difficulty: block.difficulty,
                    },
                );
            }

            previous_hash = Some(hash);
        }

        if let (Some(last), Some(head)) = (self.blocks.last(), previous_hash) {
            if self.chain_hash != head {
                report.record(
                    last.index,
                    ViolationKind::StaleHead {
                        expected: head,
                        found: self.chain_hash.clone(),
                    },
                );
            }
        }

        report
    }

    /// True if every link, every proof of work and the head pointer check out
    pub fn is_valid(&self) -> bool {
        self.validate().is_valid()
    }
}
