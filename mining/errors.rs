//! Error types for the mining engine
//!
//! Expected races (bus invalidity, chain rejection of a stale bus) are modelled
//! as recoverable variants; everything else propagates to the caller.

use thiserror::Error;

/// Failures surfaced by the chain collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The chain executed and refused the request (stale bus, already claimed)
    #[error("Rejected by chain: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Errors raised while starting or running a mining session
#[derive(Error, Debug)]
pub enum MiningError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("A mining session is already active")]
    SessionActive,

    #[error("Failed to fetch mining account: {0}")]
    AccountFetch(#[source] ChainError),

    #[error("Failed to fetch bus difficulty: {0}")]
    BusFetch(#[source] ChainError),

    #[error("Failed to spawn search unit {unit}: {source}")]
    Spawn {
        unit: usize,
        #[source]
        source: std::io::Error,
    },
}

/// A single search unit failed; the session keeps running without it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Search unit {unit} failed: {reason}")]
pub struct UnitError {
    pub unit: usize,
    pub reason: String,
}

/// Errors from the bus resolver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The epoch source could not be read; waiting cannot make progress
    #[error("Epoch source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Submission abandoned")]
    Abandoned,
}

/// Errors from one submission attempt or from the retry orchestrator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Rejected by chain: {0}")]
    RejectedByChain(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid chain response: {0}")]
    InvalidResponse(String),

    #[error("Epoch source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Submission abandoned")]
    Abandoned,
}

impl From<ChainError> for SubmitError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Rejected(msg) => SubmitError::RejectedByChain(msg),
            ChainError::Network(msg) => SubmitError::Network(msg),
            // A bus object that no longer exists is a stale reference
            ChainError::NotFound(msg) => SubmitError::RejectedByChain(msg),
            ChainError::InvalidData(msg) => SubmitError::InvalidResponse(msg),
        }
    }
}

impl From<ResolveError> for SubmitError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::SourceUnavailable(msg) => SubmitError::SourceUnavailable(msg),
            ResolveError::Abandoned => SubmitError::Abandoned,
        }
    }
}

/// Errors from the progress store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
