use sha2::{Digest, Sha256};
use thiserror::Error;

use std::time::Instant;

/// Number of hashes computed by the startup hash-rate benchmark
pub const HASH_RATE_SAMPLES: u64 = 1_000_000;

/// Fixed input hashed by the benchmark
const BENCHMARK_INPUT: &str = "00000000";

/// SHA-256 of "abc" (FIPS 180-2, appendix B.1)
const KNOWN_ANSWER_INPUT: &str = "abc";
const KNOWN_ANSWER_DIGEST: &str =
    "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

/// Errors that can occur in the hashing layer
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("Hash primitive unavailable: {0}")]
    PrimitiveUnavailable(String),
}

/// Hashes a string with SHA-256
///
/// # Returns
///
/// The digest as a lowercase hexadecimal string (64 characters)
pub fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checks whether the first `n` hex digits of `hash` are all `'0'`
///
/// A target longer than the hash can never be met.
pub fn has_leading_zero_nibbles(hash: &str, n: usize) -> bool {
    if n > hash.len() {
        return false;
    }
    hash.bytes().take(n).all(|b| b == b'0')
}

/// Verifies that SHA-256 produces the published answer for a known input
///
/// Everything the ledger guarantees rests on this primitive, so callers
/// should abort when this fails.
pub fn self_test() -> Result<(), DigestError> {
    let actual = digest(KNOWN_ANSWER_INPUT);
    if actual != KNOWN_ANSWER_DIGEST {
        return Err(DigestError::PrimitiveUnavailable(format!(
            "SHA-256 known-answer test failed: expected {}, got {}",
            KNOWN_ANSWER_DIGEST, actual
        )));
    }
    Ok(())
}

/// Hashes a fixed string `samples` times and reports the observed rate
///
/// # Returns
///
/// Approximate hashes per second on this machine
pub fn benchmark(samples: u64) -> u64 {
    let start = Instant::now();
    for _ in 0..samples {
        let mut hasher = Sha256::new();
        hasher.update(BENCHMARK_INPUT.as_bytes());
        std::hint::black_box(hasher.finalize());
    }
    let seconds = start.elapsed().as_secs_f64().max(f64::EPSILON);
    (samples as f64 / seconds) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let first = digest("ledger");
        let second = digest("ledger");

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert_ne!(first, digest("ledger!"));
    }

    #[test]
    fn test_self_test_passes() {
        assert!(self_test().is_ok());
    }

    #[test]
    fn test_leading_zero_nibbles() {
        assert!(has_leading_zero_nibbles("000abc", 3));
        assert!(!has_leading_zero_nibbles("000abc", 4));
        assert!(has_leading_zero_nibbles("abc", 0));
        assert!(!has_leading_zero_nibbles("00", 3));
    }

    #[test]
    fn test_benchmark_reports_positive_rate() {
        assert!(benchmark(1_000) > 0);
    }
}
