//! Contract required from the chain collaborator
//!
//! The engine never implements a blockchain client itself. It reads the
//! caller's mining account and the shared bus, and hands a finished proof back
//! for submission.

use crate::errors::ChainError;
use crate::job::{AccountRef, Proof, SignerId};
use miner_hashes::Hash;
use serde::{Deserialize, Serialize};

/// On-chain mining account of a signer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerAccount {
    pub id: AccountRef,
    /// Target hash the next proof must be derived from
    pub current_hash: Hash,
}

/// Shared reward epoch object
///
/// Read-only from the engine's point of view; its validity can flip at any
/// moment because of other miners or an epoch rollover.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bus {
    pub id: String,
    pub reward_rate: u64,
    /// Rewards left in the current epoch
    pub rewards: u64,
    pub difficulty: u64,
    pub epoch: u64,
    /// Unix time in milliseconds at which the current epoch ends
    pub valid_until_ms: u64,
}

impl Bus {
    /// A bus accepts a proof while it can still pay one reward and its epoch is open
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        self.rewards >= self.reward_rate && now_ms < self.valid_until_ms
    }
}

/// Outcome of a landed proof transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub digest: String,
}

/// Reads and writes the engine needs from the chain
pub trait ChainClient: Send + Sync {
    fn fetch_account(&self, account: &AccountRef) -> Result<MinerAccount, ChainError>;

    fn fetch_bus(&self) -> Result<Bus, ChainError>;

    /// Builds and sends exactly one transaction claiming the reward for `proof` on `bus`
    fn submit_proof(
        &self,
        signer: &SignerId,
        proof: &Proof,
        bus: &Bus,
    ) -> Result<TransactionResult, ChainError>;
}

impl<C: ChainClient + ?Sized> ChainClient for std::sync::Arc<C> {
    fn fetch_account(&self, account: &AccountRef) -> Result<MinerAccount, ChainError> {
        (**self).fetch_account(account)
    }

    fn fetch_bus(&self) -> Result<Bus, ChainError> {
        (**self).fetch_bus()
    }

    fn submit_proof(
        &self,
        signer: &SignerId,
        proof: &Proof,
        bus: &Bus,
    ) -> Result<TransactionResult, ChainError> {
        (**self).submit_proof(signer, proof, bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(rewards: u64, valid_until_ms: u64) -> Bus {
        Bus {
            id: "0xbus".to_string(),
            reward_rate: 10,
            rewards,
            difficulty: 2,
            epoch: 1,
            valid_until_ms,
        }
    }

    #[test]
    fn test_bus_validity_predicate() {
        assert!(bus(10, 1_000).is_valid_at(999));
        assert!(!bus(10, 1_000).is_valid_at(1_000));
        assert!(!bus(9, 1_000).is_valid_at(0));
    }

    #[test]
    fn test_bus_json_shape() {
        let value = serde_json::to_value(bus(10, 5)).unwrap();
        assert_eq!(value["rewardRate"], 10);
        assert_eq!(value["validUntilMs"], 5);
    }
}
