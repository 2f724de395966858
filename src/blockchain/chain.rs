use log::info;
use thiserror::Error;

use super::block::Block;
use super::digest;
use super::pow::{self, Miner, MiningError};
use super::storage::StorageError;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Block index {index} out of range (chain length {len})")]
    OutOfRange { index: u64, len: usize },

    #[error("Invalid difficulty: {0}")]
    InvalidDifficulty(String),

    #[error("Block index mismatch: expected {expected}, got {got}")]
    IndexMismatch { expected: u64, got: u64 },

    #[error("Mining error: {0}")]
    MiningError(#[from] MiningError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("System error: {0}")]
    SystemError(String),
}

/// An ordered sequence of blocks plus a cached pointer to its head
#[derive(Debug, Clone, Default)]
pub struct Chain {
    /// The blocks, genesis first
    pub(super) blocks: Vec<Block>,

    /// Hash of the most recently appended block (empty for an empty chain)
    pub(super) chain_hash: String,

    /// Diagnostic estimate of this machine's hash rate
    hashes_per_second: u64,
}

impl Chain {
    /// Creates an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a chain from stored parts without re-checking them
    pub(super) fn from_parts(blocks: Vec<Block>, chain_hash: String) -> Self {
        Chain {
            blocks,
            chain_hash,
            hashes_per_second: 0,
        }
    }

    /// Links `block` to the current head, mines it, and appends it
    ///
    /// The block's index must equal the current chain length. If mining
    /// fails the chain is left untouched.
    ///
    /// # Returns
    ///
    /// The hash of the appended block, which becomes the new head
    pub fn append(&mut self, mut block: Block, miner: &Miner) -> Result<String, BlockchainError> {
        let expected = self.blocks.len() as u64;
        if block.index != expected {
            return Err(BlockchainError::IndexMismatch {
                expected,
                got: block.index,
            });
        }

        block.previous_hash = self.chain_hash.clone();
        let hash = block.mine(miner)?;

        info!(
            "Appended block {} at difficulty {} ({})",
            block.index, block.difficulty, hash
        );

        self.chain_hash = hash.clone();
        self.blocks.push(block);
        Ok(hash)
    }

    /// Gets the most recently appended block
    pub fn latest(&self) -> Result<&Block, BlockchainError> {
        self.blocks.last().ok_or(BlockchainError::OutOfRange { index: 0, len: 0 })
    }

    /// Gets the block at position `index`
    pub fn get(&self, index: u64) -> Result<&Block, BlockchainError> {
        let len = self.blocks.len();
        usize::try_from(index)
            .ok()
            .and_then(|i| self.blocks.get(i))
            .ok_or(BlockchainError::OutOfRange { index, len })
    }

    /// Overwrites the payload of block `index` without re-mining it
    ///
    /// This deliberately breaks the chain's integrity.
    pub fn corrupt(&mut self, index: u64, data: impl Into<String>) -> Result<(), BlockchainError> {
        let len = self.blocks.len();
        let block = usize::try_from(index)
            .ok()
            .and_then(|i| self.blocks.get_mut(i))
            .ok_or(BlockchainError::OutOfRange { index, len })?;

        block.data = data.into();
        Ok(())
    }

    /// All blocks, genesis first
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The cached head pointer
    pub fn chain_hash(&self) -> &str {
        &self.chain_hash
    }

    /// Sum of the difficulty of every block
    pub fn total_difficulty(&self) -> u64 {
        self.blocks.iter().map(|b| u64::from(b.difficulty)).sum()
    }

    /// Expected number of hashes needed to mine the whole chain
    pub fn total_expected_hashes(&self) -> f64 {
        self.blocks
            .iter()
            .map(|b| pow::expected_hashes(b.difficulty))
            .sum()
    }

    /// Benchmarks the hash function and records the result
    pub fn estimate_hash_rate(&mut self, samples: u64) -> u64 {
        self.hashes_per_second = digest::benchmark(samples);
        info!("Estimated hash rate: {} hashes/s", self.hashes_per_second);
        self.hashes_per_second
    }

    /// The last recorded hash-rate estimate (0 until benchmarked)
    pub fn hashes_per_second(&self) -> u64 {
        self.hashes_per_second
    }
}
