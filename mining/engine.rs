//! Command dispatch between the UI port and the mining engine
//!
//! `Engine::handle` never blocks on chain I/O beyond the account read done at
//! mining start; submissions run on their own thread and report through the
//! event channel.

use crate::bus::{AbortHandle, BusResolver};
use crate::chain::ChainClient;
use crate::errors::SubmitError;
use crate::events::{EngineCommand, EngineEvent};
use crate::job::{AccountRef, Proof, SignerId};
use crate::manager::{MiningConfig, MiningCoordinator, SessionSummary};
use crate::pow::ProofOfWork;
use crate::progress::ProgressStore;
use crate::retry::{RetryOrchestrator, SubmissionConfig, SubmissionReport};
use crate::submit::ProofSubmitter;
use miner_hashes::PowHasher;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type SubmissionResult = Result<SubmissionReport, SubmitError>;

struct SubmissionTask {
    nonce: u64,
    abort: AbortHandle,
    thread: JoinHandle<SubmissionResult>,
}

/// Mining engine driven by [`EngineCommand`]s
pub struct Engine<C, S, H>
where
    C: ChainClient + 'static,
    S: ProgressStore + 'static,
    H: PowHasher,
{
    chain: Arc<C>,
    hasher: H,
    coordinator: MiningCoordinator<Arc<C>, S, H>,
    submission_config: SubmissionConfig,
    submission: Option<SubmissionTask>,
    events: Sender<EngineEvent>,
}

impl<C, S, H> Engine<C, S, H>
where
    C: ChainClient + 'static,
    S: ProgressStore + 'static,
    H: PowHasher,
{
    pub fn new(
        chain: Arc<C>,
        store: Arc<S>,
        hasher: H,
        mining_config: MiningConfig,
        submission_config: SubmissionConfig,
        events: Sender<EngineEvent>,
    ) -> Self {
        let coordinator = MiningCoordinator::new(
            mining_config,
            Arc::clone(&chain),
            store,
            hasher.clone(),
            events.clone(),
        );
        Self {
            chain,
            hasher,
            coordinator,
            submission_config,
            submission: None,
            events,
        }
    }

    /// Handles one inbound command; outcomes are reported as events
    pub fn handle(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::StartMining { signer, account } => self.start_mining(signer, &account),
            EngineCommand::StopMining => {
                self.coordinator.stop_mining();
            }
            EngineCommand::SubmitProof { signer, proof } => self.submit_proof(signer, proof),
            EngineCommand::AbandonSubmission => {
                self.abandon_submission();
            }
        }
    }

    /// Blocks until the current mining session ends on its own
    pub fn wait_for_mining(&mut self) -> Option<SessionSummary> {
        self.coordinator.wait_for_session()
    }

    /// Blocks until the in-flight submission reaches a terminal state
    pub fn wait_for_submission(&mut self) -> Option<SubmissionResult> {
        let task = self.submission.take()?;
        Self::join_submission(task)
    }

    pub fn is_mining(&self) -> bool {
        self.coordinator.is_active()
    }

    pub fn is_submitting(&self) -> bool {
        self.submission
            .as_ref()
            .map(|t| !t.thread.is_finished())
            .unwrap_or(false)
    }

    /// Stops mining, abandons any pending submission and waits for both
    pub fn shutdown(&mut self) {
        self.coordinator.stop_mining();
        self.abandon_submission();
    }

    fn start_mining(&mut self, signer: SignerId, account: &AccountRef) {
        if let Err(e) = self.coordinator.start_mining(signer, account) {
            log::error!("Failed to start mining: {}", e);
            self.emit(EngineEvent::MiningError(e.to_string()));
        }
    }

    fn submit_proof(&mut self, signer: SignerId, proof: Proof) {
        if self.is_submitting() {
            log::warn!("Refusing proof nonce {}: a submission is already in flight", proof.nonce);
            self.emit(EngineEvent::ProofSubmitError(
                "a proof submission is already in progress".to_string(),
            ));
            return;
        }
        if let Some(task) = self.submission.take() {
            Self::join_submission(task);
        }

        if !ProofOfWork::verify_proof(&self.hasher, &proof) {
            log::error!("Refusing proof nonce {}: it does not satisfy its difficulty", proof.nonce);
            self.emit(EngineEvent::ProofSubmitError(
                "proof does not satisfy its difficulty".to_string(),
            ));
            return;
        }

        let abort = AbortHandle::new();
        let task_abort = abort.clone();
        let nonce = proof.nonce;
        let orchestrator = RetryOrchestrator::new(
            BusResolver::new(
                Arc::clone(&self.chain),
                self.submission_config.epoch_poll_interval,
            ),
            ProofSubmitter::new(Arc::clone(&self.chain)),
            self.events.clone(),
        )
        .with_rejection_backoff(self.submission_config.epoch_poll_interval);

        let spawned = thread::Builder::new()
            .name("proof-submission".to_string())
            .spawn(move || orchestrator.submit(&signer, &proof, &task_abort));

        match spawned {
            Ok(thread) => {
                self.submission = Some(SubmissionTask {
                    nonce,
                    abort,
                    thread,
                })
            }
            Err(e) => {
                log::error!("Failed to spawn submission thread: {}", e);
                self.emit(EngineEvent::ProofSubmitError(e.to_string()));
            }
        }
    }

    fn abandon_submission(&mut self) -> Option<SubmissionResult> {
        let task = self.submission.take()?;
        log::info!("Abandoning submission of proof nonce {}", task.nonce);
        task.abort.abort();
        Self::join_submission(task)
    }

    fn join_submission(task: SubmissionTask) -> Option<SubmissionResult> {
        match task.thread.join() {
            Ok(result) => Some(result),
            Err(_) => {
                log::error!("Submission thread for nonce {} panicked", task.nonce);
                None
            }
        }
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Event receiver dropped; discarding event");
        }
    }
}

impl<C, S, H> Drop for Engine<C, S, H>
where
    C: ChainClient + 'static,
    S: ProgressStore + 'static,
    H: PowHasher,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
