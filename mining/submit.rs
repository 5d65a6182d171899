//! Proof submission against a resolved bus

use crate::chain::{Bus, ChainClient, TransactionResult};
use crate::errors::SubmitError;
use crate::job::{Proof, SignerId};

/// Sends one proof transaction and classifies the outcome
pub trait ProofSubmission {
    fn submit(
        &self,
        signer: &SignerId,
        proof: &Proof,
        bus: &Bus,
    ) -> Result<TransactionResult, SubmitError>;
}

/// Submits proofs through the chain client
pub struct ProofSubmitter<C: ChainClient> {
    chain: C,
}

impl<C: ChainClient> ProofSubmitter<C> {
    pub fn new(chain: C) -> Self {
        Self { chain }
    }
}

impl<C: ChainClient> ProofSubmission for ProofSubmitter<C> {
    fn submit(
        &self,
        signer: &SignerId,
        proof: &Proof,
        bus: &Bus,
    ) -> Result<TransactionResult, SubmitError> {
        log::info!(
            "Submitting proof nonce {} against bus {} (epoch {})",
            proof.nonce,
            bus.id,
            bus.epoch
        );
        match self.chain.submit_proof(signer, proof, bus) {
            Ok(result) => {
                log::info!("Proof accepted in transaction {}", result.digest);
                Ok(result)
            }
            Err(e) => {
                let err = SubmitError::from(e);
                log::warn!("Proof submission failed: {}", err);
                Err(err)
            }
        }
    }
}
