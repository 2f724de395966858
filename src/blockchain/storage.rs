use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, IVec, Transactional, Tree};
use thiserror::Error;
use log::{debug, warn};

use super::block::Block;
use super::chain::Chain;

/// Metadata key holding the cached head pointer
const CHAIN_HASH_KEY: &str = "chain_hash";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),
}

impl From<TransactionError<()>> for StorageError {
    fn from(err: TransactionError<()>) -> Self {
        match err {
            TransactionError::Abort(()) => {
                StorageError::TransactionAborted("write was aborted".to_string())
            }
            TransactionError::Storage(e) => StorageError::DatabaseError(e),
        }
    }
}

/// Durable home for a chain
///
/// The ledger writes through this after every mutation and only commits the
/// change in memory once the write has succeeded.
pub trait ChainStore: Send + Sync + std::fmt::Debug {
    /// Saves a newly appended block and moves the head pointer to `chain_hash`
    fn save_block(&self, block: &Block, chain_hash: &str) -> Result<(), StorageError>;

    /// Replaces the stored chain with `chain`
    fn save_chain(&self, chain: &Chain) -> Result<(), StorageError>;

    /// Flushes all pending writes to disk
    fn flush(&self) -> Result<(), StorageError>;
}

fn encode_block(block: &Block) -> Result<(IVec, IVec), StorageError> {
    let value = bincode::serialize(block)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;
    Ok((IVec::from(block.index.to_be_bytes().to_vec()), IVec::from(value)))
}

/// Storage for ledger data
pub struct BlockchainStorage {
    /// The database instance
    db: Db,

    /// Blocks keyed by big-endian index, so iteration follows chain order
    blocks: Tree,

    /// Tree for metadata
    metadata: Tree,
}

impl std::fmt::Debug for BlockchainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainStorage")
            .finish()
    }
}

impl BlockchainStorage {
    /// Opens (or creates) the storage at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the database directory
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;

        let blocks = db.open_tree("blocks")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            metadata,
        })
    }

    /// Writes `entries` and the head pointer in one transaction
    ///
    /// Keys listed in `stale` are removed in the same transaction, so readers
    /// never see a partially rewritten chain.
    fn commit(
        &self,
        entries: &[(IVec, IVec)],
        stale: &[IVec],
        chain_hash: &str,
    ) -> Result<(), StorageError> {
        (&self.blocks, &self.metadata).transaction(|(blocks, metadata)| {
            for key in stale {
                blocks.remove(key.clone())?;
            }
            for (key, value) in entries {
                blocks.insert(key.clone(), value.clone())?;
            }
            metadata.insert(CHAIN_HASH_KEY, chain_hash.as_bytes())?;
            Ok::<_, ConflictableTransactionError<()>>(())
        })?;
        Ok(())
    }

    /// Loads the stored chain
    ///
    /// Blocks are restored exactly as written, corruption included, so a
    /// tampered chain stays detectable across restarts.
    ///
    /// # Returns
    ///
    /// `StorageError::NotFound` when nothing has been stored yet
    pub fn load_chain(&self) -> Result<Chain, StorageError> {
        let mut blocks = Vec::new();

        for result in self.blocks.iter() {
            let (key, value) = result?;
            let block: Block = bincode::deserialize(&value).map_err(|e| {
                StorageError::DeserializationError(format!(
                    "block {:?}: {}",
                    key.as_ref(),
                    e
                ))
            })?;
            blocks.push(block);
        }

        if blocks.is_empty() {
            return Err(StorageError::NotFound("No blocks found in storage".to_string()));
        }

        for (position, block) in blocks.iter().enumerate() {
            if block.index != position as u64 {
                warn!(
                    "Stored block at position {} carries index {}",
                    position, block.index
                );
            }
        }

        let chain_hash = self.get_chain_hash()?;
        Ok(Chain::from_parts(blocks, chain_hash))
    }

    /// Gets the stored head pointer
    pub fn get_chain_hash(&self) -> Result<String, StorageError> {
        if let Some(value) = self.metadata.get(CHAIN_HASH_KEY)? {
            Ok(String::from_utf8_lossy(&value).to_string())
        } else {
            Err(StorageError::NotFound("Chain hash not found".to_string()))
        }
    }
}

impl ChainStore for BlockchainStorage {
    /// Saves a block and moves the stored head pointer to `chain_hash`
    ///
    /// # Arguments
    ///
    /// * `block` - The block to save
    /// * `chain_hash` - The chain's head pointer after the block was added
    fn save_block(&self, block: &Block, chain_hash: &str) -> Result<(), StorageError> {
        let entry = encode_block(block)?;
        self.commit(&[entry], &[], chain_hash)?;

        debug!("Stored block {}", block.index);
        Ok(())
    }

    /// Overwrites the stored chain with `chain`
    ///
    /// Used after operations that rewrite existing blocks (corrupt, repair).
    fn save_chain(&self, chain: &Chain) -> Result<(), StorageError> {
        let entries = chain
            .blocks()
            .iter()
            .map(encode_block)
            .collect::<Result<Vec<_>, _>>()?;

        let mut stale = Vec::new();
        for key in self.blocks.iter().keys() {
            let key = key?;
            if !entries.iter().any(|(k, _)| *k == key) {
                stale.push(key);
            }
        }

        self.commit(&entries, &stale, chain.chain_hash())?;

        debug!("Stored chain of {} blocks", chain.len());
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
