//! Submission state machine
//!
//! ```text
//! ResolvingBus -> Submitting -> Success
//!      ^   |          |
//!      |   v          +-- RejectedByChain --> ResolvingBus
//!   WaitingEpoch      +-- other errors -----> Failed
//! ```
//!
//! Bus invalidity and chain rejection are expected races against epoch timing
//! and loop without a bound; the caller can end the loop with an
//! [`AbortHandle`]. A rejection is followed by a backoff before the bus is
//! resolved again, so a bus that keeps reading as valid is not hammered with
//! transactions. Transport failures are terminal.

use crate::bus::{sleep_unless_aborted, AbortHandle, BusSource};
use crate::chain::{Bus, TransactionResult};
use crate::errors::SubmitError;
use crate::events::{EngineEvent, StatusCode};
use crate::job::{Proof, SignerId};
use crate::submit::ProofSubmission;
use std::sync::mpsc::Sender;
use std::time::Duration;

/// Configuration for proof submission
#[derive(Clone, Debug)]
pub struct SubmissionConfig {
    /// Delay between bus reads while waiting for a new epoch, also used as
    /// the backoff after a rejected submission
    pub epoch_poll_interval: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            epoch_poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionState {
    ResolvingBus,
    WaitingEpoch,
    Submitting(Bus),
    Success(TransactionResult),
    Failed(SubmitError),
}

/// One submit try; lives for a single loop iteration
#[derive(Debug)]
struct SubmissionAttempt<'a> {
    proof: &'a Proof,
    bus: &'a Bus,
    outcome: Result<TransactionResult, SubmitError>,
}

/// Result of a successful submission
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionReport {
    pub transaction: TransactionResult,
    /// Number of submit calls made
    pub attempts: u32,
    /// Number of completed epoch waits
    pub epoch_waits: u32,
}

/// Drives one proof through bus resolution, submission and retries
pub struct RetryOrchestrator<B: BusSource, P: ProofSubmission> {
    buses: B,
    submitter: P,
    events: Sender<EngineEvent>,
    rejection_backoff: Duration,
}

impl<B: BusSource, P: ProofSubmission> RetryOrchestrator<B, P> {
    pub fn new(buses: B, submitter: P, events: Sender<EngineEvent>) -> Self {
        Self {
            buses,
            submitter,
            events,
            rejection_backoff: SubmissionConfig::default().epoch_poll_interval,
        }
    }

    /// Pause between a rejected submission and the next bus resolution
    pub fn with_rejection_backoff(mut self, backoff: Duration) -> Self {
        self.rejection_backoff = backoff;
        self
    }

    /// Submits `proof` until it lands, fails terminally, or `abort` fires.
    ///
    /// The same proof is re-submitted after each rejection; it is never
    /// submitted again once a submission succeeded.
    pub fn submit(
        &self,
        signer: &SignerId,
        proof: &Proof,
        abort: &AbortHandle,
    ) -> Result<SubmissionReport, SubmitError> {
        let mut state = SubmissionState::ResolvingBus;
        let mut attempts = 0u32;
        let mut epoch_waits = 0u32;

        loop {
            log::debug!("Submission of nonce {} in state {:?}", proof.nonce, state);
            state = match state {
                SubmissionState::ResolvingBus => self.resolve(abort),
                SubmissionState::WaitingEpoch => match self.buses.wait_until_next_epoch(abort) {
                    Ok(()) => {
                        epoch_waits += 1;
                        log::info!("Epoch rolled over, retrying proof nonce {}", proof.nonce);
                        self.emit(EngineEvent::RetrySubmitProof(proof.clone()));
                        SubmissionState::ResolvingBus
                    }
                    Err(e) => SubmissionState::Failed(e.into()),
                },
                SubmissionState::Submitting(bus) => {
                    self.emit(EngineEvent::StatusUpdate(StatusCode::Submitting));
                    attempts += 1;
                    let attempt = SubmissionAttempt {
                        proof,
                        bus: &bus,
                        outcome: self.submitter.submit(signer, proof, &bus),
                    };
                    match attempt.outcome {
                        Ok(tx) => SubmissionState::Success(tx),
                        Err(SubmitError::RejectedByChain(reason)) => {
                            log::warn!(
                                "Bus {} rejected proof nonce {} ({}); retrying in {:?}",
                                attempt.bus.id,
                                attempt.proof.nonce,
                                reason,
                                self.rejection_backoff
                            );
                            match sleep_unless_aborted(self.rejection_backoff, abort) {
                                Ok(()) => SubmissionState::ResolvingBus,
                                Err(e) => SubmissionState::Failed(e.into()),
                            }
                        }
                        Err(e) => SubmissionState::Failed(e),
                    }
                }
                SubmissionState::Success(transaction) => {
                    log::info!(
                        "Proof nonce {} landed in {} after {} attempt(s)",
                        proof.nonce,
                        transaction.digest,
                        attempts
                    );
                    self.emit(EngineEvent::StatusUpdate(StatusCode::Success));
                    self.emit(EngineEvent::SubmissionComplete(transaction.clone()));
                    return Ok(SubmissionReport {
                        transaction,
                        attempts,
                        epoch_waits,
                    });
                }
                SubmissionState::Failed(err) => {
                    log::error!("Submission of proof nonce {} failed: {}", proof.nonce, err);
                    self.emit(EngineEvent::ProofSubmitError(err.to_string()));
                    return Err(err);
                }
            };
        }
    }

    fn resolve(&self, abort: &AbortHandle) -> SubmissionState {
        if abort.is_aborted() {
            return SubmissionState::Failed(SubmitError::Abandoned);
        }
        match self.buses.find_valid_bus() {
            Ok(Some(bus)) => SubmissionState::Submitting(bus),
            Ok(None) => {
                log::warn!("No valid bus; waiting for the next epoch");
                self.emit(EngineEvent::StatusUpdate(StatusCode::BusInvalidWaiting));
                SubmissionState::WaitingEpoch
            }
            Err(e) => SubmissionState::Failed(e.into()),
        }
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Event receiver dropped; discarding event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ResolveError;
    use miner_hashes::Hash;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::time::Instant;

    struct ScriptedBusSource {
        reads: RefCell<VecDeque<Result<Option<Bus>, ResolveError>>>,
        waits: RefCell<Vec<Result<(), ResolveError>>>,
        wait_calls: RefCell<u32>,
    }

    impl BusSource for ScriptedBusSource {
        fn fetch_current_bus(&self) -> Result<Bus, ResolveError> {
            Ok(bus())
        }

        fn find_valid_bus(&self) -> Result<Option<Bus>, ResolveError> {
            let mut reads = self.reads.borrow_mut();
            if reads.len() > 1 {
                reads.pop_front().unwrap()
            } else {
                reads[0].clone()
            }
        }

        fn wait_until_next_epoch(&self, _abort: &AbortHandle) -> Result<(), ResolveError> {
            *self.wait_calls.borrow_mut() += 1;
            let mut waits = self.waits.borrow_mut();
            if waits.is_empty() {
                Ok(())
            } else {
                waits.remove(0)
            }
        }
    }

    struct ScriptedSubmitter {
        outcomes: RefCell<VecDeque<Result<TransactionResult, SubmitError>>>,
        calls: RefCell<u32>,
    }

    impl ProofSubmission for ScriptedSubmitter {
        fn submit(
            &self,
            _signer: &SignerId,
            _proof: &Proof,
            _bus: &Bus,
        ) -> Result<TransactionResult, SubmitError> {
            *self.calls.borrow_mut() += 1;
            self.outcomes
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(SubmitError::Network("script exhausted".to_string())))
        }
    }

    fn bus() -> Bus {
        Bus {
            id: "0xbus".to_string(),
            reward_rate: 1,
            rewards: 10,
            difficulty: 1,
            epoch: 3,
            valid_until_ms: u64::MAX,
        }
    }

    fn proof() -> Proof {
        Proof {
            nonce: 42,
            hash: Hash::zeroed(),
            signer: SignerId::default(),
            current_hash: Hash::from_low_byte(1),
            difficulty: 1,
        }
    }

    fn tx(digest: &str) -> TransactionResult {
        TransactionResult {
            digest: digest.to_string(),
        }
    }

    fn orchestrator(
        reads: Vec<Result<Option<Bus>, ResolveError>>,
        waits: Vec<Result<(), ResolveError>>,
        outcomes: Vec<Result<TransactionResult, SubmitError>>,
    ) -> (
        RetryOrchestrator<ScriptedBusSource, ScriptedSubmitter>,
        mpsc::Receiver<EngineEvent>,
    ) {
        let (events_tx, events_rx) = mpsc::channel();
        let buses = ScriptedBusSource {
            reads: RefCell::new(reads.into()),
            waits: RefCell::new(waits),
            wait_calls: RefCell::new(0),
        };
        let submitter = ScriptedSubmitter {
            outcomes: RefCell::new(outcomes.into()),
            calls: RefCell::new(0),
        };
        (
            RetryOrchestrator::new(buses, submitter, events_tx)
                .with_rejection_backoff(Duration::from_millis(1)),
            events_rx,
        )
    }

    #[test]
    fn test_waits_and_retries_until_success() {
        let (orch, events) = orchestrator(
            vec![Ok(None), Ok(None), Ok(Some(bus()))],
            vec![],
            vec![Err(SubmitError::RejectedByChain("stale".to_string())), Ok(tx("0xok"))],
        );
        let report = orch
            .submit(&SignerId::default(), &proof(), &AbortHandle::new())
            .unwrap();

        assert_eq!(report.attempts, 2);
        assert_eq!(report.epoch_waits, 2);
        assert_eq!(report.transaction, tx("0xok"));
        assert_eq!(*orch.submitter.calls.borrow(), 2);
        assert_eq!(*orch.buses.wait_calls.borrow(), 2);

        let events: Vec<_> = events.try_iter().collect();
        assert_eq!(
            events,
            vec![
                EngineEvent::StatusUpdate(StatusCode::BusInvalidWaiting),
                EngineEvent::RetrySubmitProof(proof()),
                EngineEvent::StatusUpdate(StatusCode::BusInvalidWaiting),
                EngineEvent::RetrySubmitProof(proof()),
                EngineEvent::StatusUpdate(StatusCode::Submitting),
                EngineEvent::StatusUpdate(StatusCode::Submitting),
                EngineEvent::StatusUpdate(StatusCode::Success),
                EngineEvent::SubmissionComplete(tx("0xok")),
            ]
        );
    }

    #[test]
    fn test_network_error_is_terminal() {
        let (orch, events) = orchestrator(
            vec![Ok(Some(bus()))],
            vec![],
            vec![Err(SubmitError::Network("reset".to_string())), Ok(tx("0xnever"))],
        );
        let err = orch
            .submit(&SignerId::default(), &proof(), &AbortHandle::new())
            .unwrap_err();
        assert_eq!(err, SubmitError::Network("reset".to_string()));
        assert_eq!(*orch.submitter.calls.borrow(), 1);
        assert!(events
            .try_iter()
            .any(|e| matches!(e, EngineEvent::ProofSubmitError(_))));
    }

    #[test]
    fn test_broken_epoch_source_is_terminal() {
        let (orch, _events) = orchestrator(
            vec![Ok(None)],
            vec![Err(ResolveError::SourceUnavailable("rpc down".to_string()))],
            vec![],
        );
        let err = orch
            .submit(&SignerId::default(), &proof(), &AbortHandle::new())
            .unwrap_err();
        assert_eq!(err, SubmitError::SourceUnavailable("rpc down".to_string()));
        assert_eq!(*orch.submitter.calls.borrow(), 0);
    }

    #[test]
    fn test_abort_stops_before_submitting() {
        let (orch, _events) = orchestrator(vec![Ok(Some(bus()))], vec![], vec![Ok(tx("0x"))]);
        let abort = AbortHandle::new();
        abort.abort();
        assert_eq!(
            orch.submit(&SignerId::default(), &proof(), &abort),
            Err(SubmitError::Abandoned)
        );
        assert_eq!(*orch.submitter.calls.borrow(), 0);
    }

    #[test]
    fn test_rejections_back_off_between_submits() {
        let backoff = Duration::from_millis(20);
        let rejected = || Err(SubmitError::RejectedByChain("proof already used".to_string()));
        let (orch, _events) = orchestrator(
            vec![Ok(Some(bus()))],
            vec![],
            vec![rejected(), rejected(), rejected(), rejected(), Ok(tx("0xlate"))],
        );
        let orch = orch.with_rejection_backoff(backoff);

        let started = Instant::now();
        let report = orch
            .submit(&SignerId::default(), &proof(), &AbortHandle::new())
            .unwrap();
        assert_eq!(report.attempts, 5);
        assert_eq!(report.epoch_waits, 0);
        assert!(started.elapsed() >= backoff * 4);
    }

    #[test]
    fn test_abort_ends_endless_rejections() {
        let (tx_events, _events) = mpsc::channel();
        let submitter = ScriptedSubmitter {
            outcomes: RefCell::new(
                (0..10_000)
                    .map(|_| Err(SubmitError::RejectedByChain("insufficient gas".to_string())))
                    .collect(),
            ),
            calls: RefCell::new(0),
        };
        let buses = ScriptedBusSource {
            reads: RefCell::new(vec![Ok(Some(bus()))].into()),
            waits: RefCell::new(vec![]),
            wait_calls: RefCell::new(0),
        };
        let orch = RetryOrchestrator::new(buses, submitter, tx_events)
            .with_rejection_backoff(Duration::from_millis(10));

        let abort = AbortHandle::new();
        let aborter = {
            let abort = abort.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                abort.abort();
            })
        };
        let result = orch.submit(&SignerId::default(), &proof(), &abort);
        aborter.join().unwrap();

        assert_eq!(result, Err(SubmitError::Abandoned));
        let calls = *orch.submitter.calls.borrow();
        assert!(calls >= 1 && calls <= 20, "submitted {} times", calls);
    }

    #[test]
    fn test_valid_bus_first_read_submits_once() {
        let (orch, _events) = orchestrator(vec![Ok(Some(bus()))], vec![], vec![Ok(tx("0x1"))]);
        let report = orch
            .submit(&SignerId::default(), &proof(), &AbortHandle::new())
            .unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(report.epoch_waits, 0);
    }
}
