use chrono::{DateTime, SecondsFormat, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::digest;
use super::pow::{Miner, MiningError};

/// Version of the canonical field layout fed to the hash function.
///
/// Every stored nonce depends on this layout; bump it whenever
/// `canonical_string` changes.
pub const HASH_LAYOUT_VERSION: u32 = 1;

/// Rendered in place of the nonce before a block has been mined
const UNMINED_NONCE: &str = "null";

/// Represents a single entry in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Position of the block in the chain (0 is genesis)
    pub index: u64,

    /// Creation time of the block
    #[schema(value_type = String, example = "2023-01-01T12:00:00.000000000Z")]
    pub timestamp: DateTime<Utc>,

    /// Transaction payload
    pub data: String,

    /// Minimum number of leading hex zeros required in the block hash
    pub difficulty: u32,

    /// Hash of the previous block (empty for genesis)
    pub previous_hash: String,

    /// Proof of work, absent until the block is mined
    #[serde(with = "nonce_format")]
    #[schema(value_type = Option<String>, example = "1234")]
    pub nonce: Option<BigUint>,
}

impl Block {
    /// Creates a new, unmined block stamped with the current time
    ///
    /// # Arguments
    ///
    /// * `index` - The position the block will take in the chain
    /// * `data` - The transaction payload
    /// * `difficulty` - The number of leading hex zeros the hash must have
    pub fn new(index: u64, data: impl Into<String>, difficulty: u32) -> Self {
        Self::with_timestamp(index, Utc::now(), data, difficulty)
    }

    /// Creates a new, unmined block with an explicit timestamp
    pub fn with_timestamp(
        index: u64,
        timestamp: DateTime<Utc>,
        data: impl Into<String>,
        difficulty: u32,
    ) -> Self {
        Block {
            index,
            timestamp,
            data: data.into(),
            difficulty,
            previous_hash: String::new(),
            nonce: None,
        }
    }

    /// Concatenates the hashed fields in their fixed order:
    /// index, timestamp, data, previous hash, nonce, difficulty.
    pub fn canonical_string(&self) -> String {
        let nonce = match &self.nonce {
            Some(nonce) => nonce.to_string(),
            None => UNMINED_NONCE.to_string(),
        };

        format!(
            "{}{}{}{}{}{}",
            self.index,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.data,
            self.previous_hash,
            nonce,
            self.difficulty
        )
    }

    /// Calculates the hash of the block from its current fields
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the canonical string as a hexadecimal string
    pub fn calculate_hash(&self) -> String {
        digest::digest(&self.canonical_string())
    }

    /// Runs proof of work on this block, leaving the winning nonce in place
    ///
    /// # Returns
    ///
    /// The winning hash
    pub fn mine(&mut self, miner: &Miner) -> Result<String, MiningError> {
        miner.mine(self)
    }
}

/// Serializes the nonce as a decimal string so arbitrarily large values
/// survive JSON and bincode alike.
mod nonce_format {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(nonce: &Option<BigUint>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match nonce {
            Some(nonce) => serializer.serialize_some(&nonce.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<BigUint>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| s.parse::<BigUint>().map_err(serde::de::Error::custom))
            .transpose()
    }
}
