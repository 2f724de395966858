use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::block::{Block, HASH_LAYOUT_VERSION};
use super::chain::{BlockchainError, Chain};
use super::digest::HASH_RATE_SAMPLES;
use super::pow::Miner;
use super::repair::RepairReport;
use super::storage::{BlockchainStorage, ChainStore, StorageError};
use super::validation::ValidationReport;

/// Largest difficulty a 64-digit hex hash can satisfy
pub const MAX_DIFFICULTY: u32 = 64;

/// Mining parameters shared by every operation on a ledger
#[derive(Debug, Clone)]
pub struct MiningSettings {
    /// Difficulty of the genesis block mined for a fresh ledger
    pub genesis_difficulty: u32,

    /// Per-block limit on hash attempts (None = unbounded)
    pub max_attempts: Option<u64>,

    /// Wall-clock limit on a single mining operation (None = unbounded)
    pub timeout: Option<Duration>,

    /// Number of hashes used by the startup hash-rate benchmark
    pub hash_rate_samples: u64,
}

impl Default for MiningSettings {
    fn default() -> Self {
        MiningSettings {
            genesis_difficulty: 2,
            max_attempts: None,
            timeout: None,
            hash_rate_samples: HASH_RATE_SAMPLES,
        }
    }
}

/// Summary of the chain returned by the status operation
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusReport {
    pub chain_size: usize,
    pub latest_difficulty: Option<u32>,
    pub total_difficulty: u64,
    pub hashes_per_second: u64,
    pub total_expected_hashes: f64,
    pub latest_nonce: Option<String>,
    pub chain_hash: String,
    pub hash_layout_version: u32,
}

/// Result of appending a block
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub block: Block,
    pub hash: String,
    pub elapsed: Duration,
}

/// Result of a repair pass
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub report: RepairReport,
    pub elapsed: Duration,
}

/// Shared handle to a single chain
///
/// Every mutating operation holds the write lock for its whole duration,
/// mining included, so readers never observe a half-appended block. Changes
/// are made on a copy, persisted, and only then committed in memory.
#[derive(Debug, Clone)]
pub struct Ledger {
    /// The chain of blocks
    chain: Arc<RwLock<Chain>>,

    /// Storage for ledger data
    storage: Option<Arc<dyn ChainStore>>,

    settings: MiningSettings,
}

impl Ledger {
    /// Creates an in-memory ledger holding a freshly mined genesis block
    pub fn new(settings: MiningSettings) -> Result<Self, BlockchainError> {
        let chain = Self::genesis_chain(&settings)?;
        Ok(Self::from_chain(chain, None, settings))
    }

    /// Creates a ledger backed by persistent storage
    ///
    /// An existing chain is loaded as stored; otherwise a genesis block is
    /// mined and written.
    ///
    /// # Arguments
    ///
    /// * `storage_path` - The path to the storage directory
    /// * `settings` - Mining parameters
    pub fn with_storage<P: AsRef<Path>>(
        storage_path: P,
        settings: MiningSettings,
    ) -> Result<Self, BlockchainError> {
        let storage = BlockchainStorage::new(storage_path)?;

        let chain = match storage.load_chain() {
            Ok(chain) => {
                info!("Loaded chain of {} blocks from storage", chain.len());
                if !chain.is_valid() {
                    warn!("Stored chain failed validation; run repair to restore it");
                }
                chain
            }
            Err(StorageError::NotFound(_)) => {
                info!("No existing chain found in storage, creating genesis block");
                let chain = Self::genesis_chain(&settings)?;
                storage.save_chain(&chain)?;
                storage.flush()?;
                chain
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Self::from_chain(chain, Some(Arc::new(storage)), settings))
    }

    fn genesis_chain(settings: &MiningSettings) -> Result<Chain, BlockchainError> {
        let mut chain = Chain::new();
        let genesis = Block::new(0, "", settings.genesis_difficulty);
        let miner = Self::miner_for(settings, CancellationToken::new());
        chain.append(genesis, &miner)?;

        Ok(chain)
    }

    // Runs the hash-rate benchmark once per ledger
    fn from_chain(
        mut chain: Chain,
        storage: Option<Arc<dyn ChainStore>>,
        settings: MiningSettings,
    ) -> Self {
        chain.estimate_hash_rate(settings.hash_rate_samples);
        Ledger {
            chain: Arc::new(RwLock::new(chain)),
            storage,
            settings,
        }
    }

    fn miner_for(settings: &MiningSettings, cancel: CancellationToken) -> Miner {
        let miner = Miner::unbounded().with_cancellation(cancel);
        match settings.max_attempts {
            Some(max_attempts) => miner.with_max_attempts(max_attempts),
            None => miner,
        }
    }

    /// The mining parameters this ledger was built with
    pub fn settings(&self) -> &MiningSettings {
        &self.settings
    }

    fn read_chain(&self) -> Result<RwLockReadGuard<'_, Chain>, BlockchainError> {
        self.chain
            .read()
            .map_err(|_| BlockchainError::SystemError("chain lock poisoned".to_string()))
    }

    fn write_chain(&self) -> Result<RwLockWriteGuard<'_, Chain>, BlockchainError> {
        self.chain
            .write()
            .map_err(|_| BlockchainError::SystemError("chain lock poisoned".to_string()))
    }

    /// Summarises the chain
    pub fn status(&self) -> Result<StatusReport, BlockchainError> {
        let chain = self.read_chain()?;
        let latest = chain.latest().ok();

        Ok(StatusReport {
            chain_size: chain.len(),
            latest_difficulty: latest.map(|b| b.difficulty),
            total_difficulty: chain.total_difficulty(),
            hashes_per_second: chain.hashes_per_second(),
            total_expected_hashes: chain.total_expected_hashes(),
            latest_nonce: latest.and_then(|b| b.nonce.as_ref()).map(|n| n.to_string()),
            chain_hash: chain.chain_hash().to_string(),
            hash_layout_version: HASH_LAYOUT_VERSION,
        })
    }

    /// Mines a new block carrying `data` and appends it to the chain
    ///
    /// # Arguments
    ///
    /// * `difficulty` - Leading hex zeros required, in `1..=64`
    /// * `data` - The transaction payload
    /// * `cancel` - Stops mining early when cancelled
    pub fn append(
        &self,
        difficulty: i64,
        data: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<AppendOutcome, BlockchainError> {
        let difficulty = u32::try_from(difficulty)
            .ok()
            .filter(|d| (1..=MAX_DIFFICULTY).contains(d))
            .ok_or_else(|| {
                BlockchainError::InvalidDifficulty(format!(
                    "difficulty must be between 1 and {}, got {}",
                    MAX_DIFFICULTY, difficulty
                ))
            })?;

        let miner = Self::miner_for(&self.settings, cancel);
        let mut chain = self.write_chain()?;

        let start = Instant::now();
        let mut draft = chain.clone();
        let block = Block::new(draft.len() as u64, data, difficulty);
        let hash = draft.append(block, &miner)?;
        let elapsed = start.elapsed();

        let block = draft.latest()?.clone();
        if let Some(storage) = &self.storage {
            storage.save_block(&block, draft.chain_hash())?;
            storage.flush()?;
        }
        *chain = draft;

        Ok(AppendOutcome {
            block,
            hash,
            elapsed,
        })
    }

    /// Checks the whole chain
    ///
    /// # Returns
    ///
    /// The report and the time the check took
    pub fn validate(&self) -> Result<(ValidationReport, Duration), BlockchainError> {
        let chain = self.read_chain()?;

        let start = Instant::now();
        let report = chain.validate();
        Ok((report, start.elapsed()))
    }

    /// Every block, genesis first
    pub fn dump(&self) -> Result<Vec<Block>, BlockchainError> {
        Ok(self.read_chain()?.blocks().to_vec())
    }

    /// Gets a copy of the block at position `index`
    pub fn block(&self, index: u64) -> Result<Block, BlockchainError> {
        Ok(self.read_chain()?.get(index)?.clone())
    }

    /// Overwrites the payload of block `index` without re-mining it
    pub fn corrupt(&self, index: u64, data: impl Into<String>) -> Result<(), BlockchainError> {
        let mut chain = self.write_chain()?;
        let mut draft = chain.clone();
        draft.corrupt(index, data)?;

        if let Some(storage) = &self.storage {
            storage.save_chain(&draft)?;
            storage.flush()?;
        }
        *chain = draft;

        warn!("Block {} payload overwritten", index);
        Ok(())
    }

    /// Runs the repair pass
    ///
    /// The pass runs on a copy and replaces the chain only on success, so a
    /// cancelled repair leaves the chain as it was.
    pub fn repair(&self, cancel: CancellationToken) -> Result<RepairOutcome, BlockchainError> {
        let miner = Self::miner_for(&self.settings, cancel);
        let mut chain = self.write_chain()?;

        let start = Instant::now();
        let mut draft = chain.clone();
        let report = draft.repair(&miner)?;
        let elapsed = start.elapsed();

        if let Some(storage) = &self.storage {
            if !report.is_noop() {
                storage.save_chain(&draft)?;
                storage.flush()?;
            }
        }
        *chain = draft;

        Ok(RepairOutcome { report, elapsed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> MiningSettings {
        MiningSettings {
            genesis_difficulty: 1,
            hash_rate_samples: 1_000,
            ..MiningSettings::default()
        }
    }

    fn ledger_with(difficulties: &[i64]) -> Ledger {
        let ledger = Ledger::new(test_settings()).unwrap();
        for (i, difficulty) in difficulties.iter().enumerate() {
            ledger
                .append(*difficulty, format!("payment {}", i), CancellationToken::new())
                .unwrap();
        }
        ledger
    }

    #[test]
    fn test_new_ledger_has_genesis() {
        let ledger = ledger_with(&[]);
        let status = ledger.status().unwrap();

        assert_eq!(status.chain_size, 1);
        assert_eq!(status.latest_difficulty, Some(1));
        assert_eq!(status.total_difficulty, 1);
        assert!(status.hashes_per_second > 0);
        assert!(!status.chain_hash.is_empty());

        let blocks = ledger.dump().unwrap();
        assert_eq!(blocks[0].index, 0);
        assert_eq!(blocks[0].data, "");
    }

    #[test]
    fn test_append_updates_status() {
        let ledger = ledger_with(&[2, 3]);
        let status = ledger.status().unwrap();

        assert_eq!(status.chain_size, 3);
        assert_eq!(status.latest_difficulty, Some(3));
        assert_eq!(status.total_difficulty, 6);
        assert_eq!(status.total_expected_hashes, 16.0 + 256.0 + 4096.0);

        let blocks = ledger.dump().unwrap();
        assert_eq!(status.chain_hash, blocks[2].calculate_hash());
        assert_eq!(status.latest_nonce, blocks[2].nonce.as_ref().map(|n| n.to_string()));
    }

    #[test]
    fn test_append_returns_mined_block() {
        let ledger = ledger_with(&[]);

        let outcome = ledger.append(2, "coffee", CancellationToken::new()).unwrap();

        assert_eq!(outcome.block.index, 1);
        assert_eq!(outcome.block.data, "coffee");
        assert!(outcome.hash.starts_with("00"));
    }

    #[test]
    fn test_append_rejects_bad_difficulty() {
        let ledger = ledger_with(&[]);

        for difficulty in [0, -1, 65] {
            let result = ledger.append(difficulty, "x", CancellationToken::new());
            assert!(matches!(result, Err(BlockchainError::InvalidDifficulty(_))));
        }
        assert_eq!(ledger.status().unwrap().chain_size, 1);
    }

    #[test]
    fn test_cancelled_append_keeps_chain() {
        let ledger = ledger_with(&[1]);
        let before = ledger.status().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = ledger.append(2, "never mined", token);

        assert!(matches!(result, Err(BlockchainError::MiningError(_))));
        let after = ledger.status().unwrap();
        assert_eq!(after.chain_size, before.chain_size);
        assert_eq!(after.chain_hash, before.chain_hash);
    }

    #[test]
    fn test_corrupt_then_repair() {
        let ledger = ledger_with(&[2, 2]);
        assert!(ledger.validate().unwrap().0.is_valid());

        ledger.corrupt(1, "Alice pays Mallory 1000").unwrap();
        assert!(!ledger.validate().unwrap().0.is_valid());

        let outcome = ledger.repair(CancellationToken::new()).unwrap();
        assert!(!outcome.report.is_noop());

        let (report, _) = ledger.validate().unwrap();
        assert!(report.is_valid());
        let blocks = ledger.dump().unwrap();
        assert_eq!(blocks[1].data, "Alice pays Mallory 1000");
        assert_eq!(blocks.iter().map(|b| b.difficulty).collect::<Vec<_>>(), vec![1, 2, 2]);
        assert_eq!(ledger.status().unwrap().chain_hash, blocks[2].calculate_hash());
    }

    #[test]
    fn test_block_lookup() {
        let ledger = ledger_with(&[1]);

        assert_eq!(ledger.block(1).unwrap().data, "payment 0");
        assert!(matches!(ledger.block(2), Err(BlockchainError::OutOfRange { .. })));
    }

    #[test]
    fn test_corrupt_out_of_range() {
        let ledger = ledger_with(&[]);

        let result = ledger.corrupt(3, "nothing there");

        assert!(matches!(result, Err(BlockchainError::OutOfRange { index: 3, len: 1 })));
    }

    #[test]
    fn test_cancelled_repair_leaves_chain_unchanged() {
        let ledger = ledger_with(&[2, 2]);
        ledger.corrupt(0, "broken genesis").unwrap();
        let before = ledger.dump().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        // Corrupting genesis invalidates its proof of work with high
        // probability; if it happens to still pass there is nothing to mine.
        match ledger.repair(token) {
            Err(BlockchainError::MiningError(_)) => {
                assert_eq!(ledger.dump().unwrap(), before);
            }
            Ok(_) => assert!(ledger.validate().unwrap().0.is_valid()),
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    #[derive(Debug)]
    struct UnwritableStore;

    impl ChainStore for UnwritableStore {
        fn save_block(&self, _: &Block, _: &str) -> Result<(), StorageError> {
            Err(StorageError::SerializationError("disk full".to_string()))
        }

        fn save_chain(&self, _: &Chain) -> Result<(), StorageError> {
            Err(StorageError::SerializationError("disk full".to_string()))
        }

        fn flush(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn unwritable_ledger() -> Ledger {
        let settings = test_settings();
        let chain = Ledger::genesis_chain(&settings).unwrap();
        Ledger::from_chain(chain, Some(Arc::new(UnwritableStore)), settings)
    }

    #[test]
    fn test_failed_write_leaves_chain_unchanged() {
        let ledger = unwritable_ledger();
        let before = ledger.dump().unwrap();
        let head = ledger.status().unwrap().chain_hash;

        let appended = ledger.append(1, "lost", CancellationToken::new());
        assert!(matches!(appended, Err(BlockchainError::StorageError(_))));

        let corrupted = ledger.corrupt(0, "lost");
        assert!(matches!(corrupted, Err(BlockchainError::StorageError(_))));

        assert_eq!(ledger.dump().unwrap(), before);
        assert_eq!(ledger.status().unwrap().chain_hash, head);
        assert!(ledger.validate().unwrap().0.is_valid());
    }

    #[test]
    fn test_hash_rate_measured_for_every_constructor() {
        let dir = tempfile::tempdir().unwrap();

        let in_memory = Ledger::new(test_settings()).unwrap();
        let stored = Ledger::with_storage(dir.path(), test_settings()).unwrap();

        assert!(in_memory.status().unwrap().hashes_per_second > 0);
        assert!(stored.status().unwrap().hashes_per_second > 0);
    }

    #[test]
    fn test_head_only_repair_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let settings = MiningSettings {
            genesis_difficulty: 0,
            ..test_settings()
        };

        {
            let ledger = Ledger::with_storage(dir.path(), settings.clone()).unwrap();
            ledger.corrupt(0, "rewritten genesis").unwrap();

            let outcome = ledger.repair(CancellationToken::new()).unwrap();
            assert!(outcome.report.head_refreshed);
            assert!(ledger.validate().unwrap().0.is_valid());
        }

        let reopened = Ledger::with_storage(dir.path(), settings).unwrap();
        let (report, _) = reopened.validate().unwrap();
        assert!(report.is_valid(), "violations after reload: {:?}", report.violations);
    }

    #[test]
    fn test_storage_backed_ledger_reloads() {
        let dir = tempfile::tempdir().unwrap();

        {
            let ledger = Ledger::with_storage(dir.path(), test_settings()).unwrap();
            ledger.append(1, "persisted", CancellationToken::new()).unwrap();
            ledger.corrupt(1, "tampered").unwrap();
        }

        let reopened = Ledger::with_storage(dir.path(), test_settings()).unwrap();
        let blocks = reopened.dump().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].data, "tampered");

        reopened.repair(CancellationToken::new()).unwrap();
        assert!(reopened.validate().unwrap().0.is_valid());
    }
}
