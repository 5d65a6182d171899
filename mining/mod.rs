//! Proof-of-work mining engine for an epoch-bounded on-chain reward
//!
//! The engine searches the nonce space in parallel, surfaces at most one proof
//! per session, checkpoints progress so a restarted session can resume, and
//! submits the proof through a retry loop that waits out bus invalidity at
//! epoch boundaries.
//!
//! ## Module Organization
//!
//! - [`pow`]: difficulty targets and proof verification
//! - [`job`]: session, search unit configuration and proof definitions
//! - [`worker`]: search units running on their own threads
//! - [`manager`]: the coordinator that partitions and dispatches search units
//! - [`progress`]: durable nonce checkpoints
//! - [`chain`]: the contract required from the chain collaborator
//! - [`bus`]: bus resolution and epoch waiting
//! - [`submit`]: single proof submissions
//! - [`retry`]: the submission state machine
//! - [`events`]: typed UI commands and events
//! - [`engine`]: command dispatch tying mining and submission together
//! - [`rpc_chain`]: JSON-RPC chain client

pub mod bus;
pub mod chain;
pub mod engine;
pub mod errors;
pub mod events;
pub mod job;
pub mod manager;
pub mod pow;
pub mod progress;
pub mod retry;
pub mod rpc_chain;
pub mod submit;
pub mod worker;


// Re-export main types for easier access
pub use bus::{AbortHandle, BusResolver, BusSource, Clock, SystemClock};
pub use chain::{Bus, ChainClient, MinerAccount, TransactionResult};
pub use engine::Engine;
pub use errors::{ChainError, MiningError, ResolveError, StoreError, SubmitError, UnitError};
pub use events::{EngineCommand, EngineEvent, StatusCode};
pub use job::{AccountRef, MiningSession, NonceRange, Proof, SearchUnitConfig, SessionId, SignerId};
pub use manager::{partition, MiningConfig, MiningCoordinator, SessionSummary};
pub use pow::{ProofOfWork, Target};
pub use progress::{FileProgressStore, MemoryProgressStore, ProgressStore};
pub use retry::{RetryOrchestrator, SubmissionConfig, SubmissionReport, SubmissionState};
pub use rpc_chain::{RpcChainClient, RpcChainConfig};
pub use submit::{ProofSubmission, ProofSubmitter};
pub use worker::{SearchUnit, UnitOutcome, UnitReport};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bus::{AbortHandle, BusResolver, BusSource};
    pub use crate::chain::{Bus, ChainClient};
    pub use crate::engine::Engine;
    pub use crate::events::{EngineCommand, EngineEvent, StatusCode};
    pub use crate::job::{AccountRef, NonceRange, Proof, SearchUnitConfig, SignerId};
    pub use crate::manager::{partition, MiningConfig, MiningCoordinator};
    pub use crate::pow::{ProofOfWork, Target};
    pub use crate::progress::{FileProgressStore, MemoryProgressStore};
    pub use crate::retry::{RetryOrchestrator, SubmissionConfig};
    pub use crate::rpc_chain::{RpcChainClient, RpcChainConfig};
    pub use miner_hashes::{Hash, KeccakPowHasher, PowHasher};
}
