use log::debug;
use num_bigint::BigUint;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::block::Block;
use super::digest;

/// Errors that can stop a nonce search before it succeeds
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("Mining gave up after {attempts} attempts")]
    AttemptsExhausted { attempts: u64 },

    #[error("Mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },
}

/// Proof-of-work nonce search
///
/// The search always starts at nonce 0 and counts up by one. Limits only
/// decide when to give up, never the order in which nonces are tried.
#[derive(Debug, Clone, Default)]
pub struct Miner {
    /// Give up after this many hash attempts
    max_attempts: Option<u64>,

    /// Checked before every attempt
    cancel: Option<CancellationToken>,
}

impl Miner {
    /// A miner that runs until it finds a winning nonce
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Limits the number of hashes tried per block
    pub fn with_max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Stops the search once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Searches for a nonce giving `block` a hash with at least
    /// `block.difficulty` leading hex zeros
    ///
    /// On success the winning nonce is left in `block.nonce`. On failure the
    /// nonce holds the last value tried.
    ///
    /// # Returns
    ///
    /// The winning hash
    pub fn mine(&self, block: &mut Block) -> Result<String, MiningError> {
        let target = block.difficulty as usize;
        let mut nonce = BigUint::from(0u32);
        let mut attempts: u64 = 0;

        loop {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    debug!("Mining block {} cancelled after {} attempts", block.index, attempts);
                    return Err(MiningError::Cancelled { attempts });
                }
            }
            if let Some(max_attempts) = self.max_attempts {
                if attempts >= max_attempts {
                    debug!("Mining block {} exhausted {} attempts", block.index, attempts);
                    return Err(MiningError::AttemptsExhausted { attempts });
                }
            }

            block.nonce = Some(nonce.clone());
            let hash = block.calculate_hash();
            attempts = attempts.saturating_add(1);

            if digest::has_leading_zero_nibbles(&hash, target) {
                debug!(
                    "Mined block {} at difficulty {} with nonce {} after {} attempts",
                    block.index, block.difficulty, nonce, attempts
                );
                return Ok(hash);
            }

            nonce += 1u32;
        }
    }
}

/// Expected number of hashes needed to mine a block at `difficulty`
pub fn expected_hashes(difficulty: u32) -> f64 {
    i32::try_from(difficulty).map_or(f64::INFINITY, |d| 16f64.powi(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_miner_finds_nonce() {
        let mut block = Block::new(0, "genesis", 2);

        let hash = Miner::unbounded().mine(&mut block).unwrap();

        assert!(digest::has_leading_zero_nibbles(&hash, 2));
        assert_eq!(hash, block.calculate_hash());
    }

    #[test]
    fn test_difficulty_zero_takes_first_nonce() {
        let mut block = Block::new(0, "free", 0);

        Miner::unbounded().mine(&mut block).unwrap();

        assert_eq!(block.nonce, Some(BigUint::from(0u32)));
    }

    #[test]
    fn test_mining_is_reproducible() {
        let mut first = Block::new(4, "same fields", 2);
        let mut second = first.clone();

        let a = Miner::unbounded().mine(&mut first).unwrap();
        let b = Miner::unbounded().mine(&mut second).unwrap();

        assert_eq!(a, b);
        assert_eq!(first.nonce, second.nonce);
    }

    #[test]
    fn test_max_attempts_stops_search() {
        // 64 leading zeros is effectively unreachable
        let mut block = Block::new(1, "hard", 64);

        let result = Miner::unbounded().with_max_attempts(10).mine(&mut block);

        match result {
            Err(MiningError::AttemptsExhausted { attempts }) => assert_eq!(attempts, 10),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_token_stops_search() {
        let token = CancellationToken::new();
        token.cancel();
        let mut block = Block::new(1, "hard", 64);

        let result = Miner::unbounded().with_cancellation(token).mine(&mut block);

        assert!(matches!(result, Err(MiningError::Cancelled { attempts: 0 })));
    }

    #[test]
    fn test_expected_hashes() {
        assert_eq!(expected_hashes(0), 1.0);
        assert_eq!(expected_hashes(2), 256.0);
        assert_eq!(expected_hashes(3), 4096.0);
    }

    #[test]
    fn test_expected_hashes_saturates_for_huge_difficulty() {
        assert_eq!(expected_hashes(u32::MAX), f64::INFINITY);
        assert_eq!(expected_hashes(i32::MAX as u32 + 1), f64::INFINITY);
    }
}
