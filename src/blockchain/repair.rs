use log::info;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::chain::Chain;
use super::digest;
use super::pow::{Miner, MiningError};

/// What a repair pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RepairReport {
    /// Blocks whose previous hash was rewritten
    pub relinked: Vec<u64>,

    /// Blocks that were mined again
    pub remined: Vec<u64>,

    /// Whether the cached head pointer had to be rewritten
    #[serde(default)]
    pub head_refreshed: bool,
}

impl RepairReport {
    /// True when the chain needed no changes
    pub fn is_noop(&self) -> bool {
        self.relinked.is_empty() && self.remined.is_empty() && !self.head_refreshed
    }
}

impl Chain {
    /// Restores a valid chain in a single forward pass
    ///
    /// Each block is relinked to its predecessor's actual hash and mined
    /// again if its own hash misses its difficulty. Only `previous_hash` and
    /// `nonce` ever change. The head pointer is refreshed at the end, even
    /// for a single-block chain.
    ///
    /// If mining fails part-way the blocks before the failing one have
    /// already been rewritten; callers wanting all-or-nothing should repair
    /// a clone.
    pub fn repair(&mut self, miner: &Miner) -> Result<RepairReport, MiningError> {
        let mut report = RepairReport::default();
        let mut running_hash: Option<String> = None;

        for block in self.blocks.iter_mut() {
            if let Some(previous) = running_hash.take() {
                if block.previous_hash != previous {
                    block.previous_hash = previous;
                    report.relinked.push(block.index);
                }
            }

            let mut hash = block.calculate_hash();
            if !digest::has_leading_zero_nibbles(&hash, block.difficulty as usize) {
                hash = block.mine(miner)?;
                report.remined.push(block.index);
            }

            running_hash = Some(hash);
        }

        if let Some(head) = running_hash {
            if self.chain_hash != head {
                self.chain_hash = head;
                report.head_refreshed = true;
            }
        }

        info!(
            "Repair pass finished: {} relinked, {} re-mined, head refreshed: {}",
            report.relinked.len(),
            report.remined.len(),
            report.head_refreshed
        );
        Ok(report)
    }
}
