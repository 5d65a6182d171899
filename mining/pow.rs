//! Proof-of-Work threshold handling
//!
//! The reward contract expresses difficulty as a count of leading zero bytes.
//! This module turns that count into a 256-bit target and performs the single
//! comparison shared by the search units and proof verification.

use crate::job::Proof;
use miner_hashes::{Hash, PowHasher};
use primitive_types::U256;
use std::cmp::Ordering;

/// Target represents the difficulty threshold for valid proofs
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Target(U256);

impl Target {
    /// Target implied by `difficulty` leading zero bytes
    pub fn from_difficulty(difficulty: u64) -> Self {
        if difficulty >= 32 {
            return Target(U256::zero());
        }
        Target(U256::MAX >> (8 * difficulty as usize))
    }

    /// Returns the inner U256 value
    pub fn as_u256(&self) -> U256 {
        self.0
    }
}

/// Proof-of-Work handler
pub struct ProofOfWork;

impl ProofOfWork {
    /// True if the big-endian value of `hash` is at or below the target
    #[inline]
    pub fn meets_target(hash: &Hash, target: &Target) -> bool {
        Self::compare_hash_to_target(hash, target) != Ordering::Greater
    }

    /// Re-derives the hash of `proof` and checks it against the difficulty it
    /// claims, exactly as the on-chain verifier does.
    pub fn verify_proof<H: PowHasher>(hasher: &H, proof: &Proof) -> bool {
        let derived = hasher.hash(&proof.current_hash, proof.signer.as_bytes(), proof.nonce);
        derived == proof.hash
            && Self::meets_target(&derived, &Target::from_difficulty(proof.difficulty))
    }

    /// Calculates the hash rate (hashes per second)
    pub fn calculate_hash_rate(hashes: u64, duration_ms: u64) -> f64 {
        if duration_ms == 0 {
            return 0.0;
        }
        (hashes as f64) / (duration_ms as f64 / 1000.0)
    }

    /// Compares hash against target and returns ordering
    pub fn compare_hash_to_target(hash: &Hash, target: &Target) -> Ordering {
        Self::hash_to_u256(hash).cmp(&target.0)
    }

    fn hash_to_u256(hash: &Hash) -> U256 {
        U256::from_big_endian(hash.as_bytes())
    }
}
