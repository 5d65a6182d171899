//! Search unit thread implementation
//!
//! A search unit receives one [`SearchUnitConfig`], walks its nonce range and
//! reports back over a channel. It shares nothing with its siblings; the only
//! inbound signal after dispatch is its own cancellation flag.

use crate::job::{NonceRange, Proof, SearchUnitConfig};
use crate::pow::{ProofOfWork, Target};
use miner_hashes::PowHasher;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Messages a search unit sends to the coordinator
#[derive(Debug)]
pub enum UnitMessage {
    /// Last nonce evaluated by the unit
    Progress { unit: usize, nonce: u64 },
    /// Final message; every unit sends exactly one
    Exit(UnitReport),
}

/// How a search unit terminated
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitOutcome {
    Found(Proof),
    Cancelled,
    Exhausted,
    Failed(String),
}

/// Final report of a search unit
#[derive(Clone, Debug)]
pub struct UnitReport {
    pub unit: usize,
    pub outcome: UnitOutcome,
    /// Number of nonces evaluated
    pub iterations: u64,
    /// Last nonce evaluated, if any
    pub last_nonce: Option<u64>,
    pub time_ms: u64,
}

impl UnitReport {
    pub fn hash_rate(&self) -> f64 {
        ProofOfWork::calculate_hash_rate(self.iterations, self.time_ms)
    }
}

/// Coordinator-side handle of a running search unit
#[derive(Debug)]
pub struct UnitHandle {
    pub id: usize,
    pub range: NonceRange,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl UnitHandle {
    /// Signals the unit to stop; it exits before evaluating another nonce
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Waits for the unit thread to terminate
    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("Search unit {} thread panicked outside the search loop", self.id);
            }
        }
    }
}

impl Drop for UnitHandle {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

/// A search unit processing one nonce range in its own thread
pub struct SearchUnit<H: PowHasher> {
    config: SearchUnitConfig,
    hasher: H,
    cancel: Arc<AtomicBool>,
    result_tx: Sender<UnitMessage>,
}

impl<H: PowHasher> SearchUnit<H> {
    pub fn new(
        config: SearchUnitConfig,
        hasher: H,
        cancel: Arc<AtomicBool>,
        result_tx: Sender<UnitMessage>,
    ) -> Self {
        Self {
            config,
            hasher,
            cancel,
            result_tx,
        }
    }

    /// Starts the unit on a dedicated OS thread
    pub fn spawn(
        config: SearchUnitConfig,
        hasher: H,
        result_tx: Sender<UnitMessage>,
    ) -> std::io::Result<UnitHandle> {
        let id = config.unit_id;
        let range = config.range;
        let cancel = Arc::new(AtomicBool::new(false));
        let unit = SearchUnit::new(config, hasher, Arc::clone(&cancel), result_tx);

        let thread = thread::Builder::new()
            .name(format!("search-unit-{}", id))
            .spawn(move || unit.run())?;

        Ok(UnitHandle {
            id,
            range,
            cancel,
            thread: Some(thread),
        })
    }

    /// Runs the search to completion and sends the exit report
    pub fn run(self) {
        let unit = self.config.unit_id;
        log::debug!(
            "Search unit {} started on nonces {}..={}",
            unit,
            self.config.range.start,
            self.config.range.end_inclusive
        );

        let start_time = Instant::now();
        let mut iterations = 0u64;
        let mut last_nonce = None;

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.search(&mut iterations, &mut last_nonce)
        })) {
            Ok(outcome) => outcome,
            Err(payload) => UnitOutcome::Failed(panic_message(payload.as_ref())),
        };

        let report = UnitReport {
            unit,
            outcome,
            iterations,
            last_nonce,
            time_ms: start_time.elapsed().as_millis() as u64,
        };

        log::debug!(
            "Search unit {} exiting ({:?}) after {} iterations ({:.2} H/s)",
            unit,
            outcome_label(&report.outcome),
            report.iterations,
            report.hash_rate()
        );

        // The coordinator may already be gone after a stop; nothing left to report to
        let _ = self.result_tx.send(UnitMessage::Exit(report));
    }

    fn search(&self, iterations: &mut u64, last_nonce: &mut Option<u64>) -> UnitOutcome {
        let config = &self.config;
        if config.range.is_empty() {
            return UnitOutcome::Exhausted;
        }

        let target = Target::from_difficulty(config.difficulty);
        let signer = config.signer.as_bytes();
        let mut nonce = config.range.start;

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return UnitOutcome::Cancelled;
            }

            let hash = self.hasher.hash(&config.current_hash, signer, nonce);
            *iterations += 1;
            *last_nonce = Some(nonce);

            if ProofOfWork::meets_target(&hash, &target) {
                log::info!(
                    "Search unit {} found nonce {} after {} iterations",
                    config.unit_id,
                    nonce,
                    iterations
                );
                return UnitOutcome::Found(Proof {
                    nonce,
                    hash,
                    signer: config.signer,
                    current_hash: config.current_hash,
                    difficulty: config.difficulty,
                });
            }

            if config.checkpoint_interval > 0 && *iterations % config.checkpoint_interval == 0 {
                let _ = self.result_tx.send(UnitMessage::Progress {
                    unit: config.unit_id,
                    nonce,
                });
            }

            if nonce == config.range.end_inclusive {
                return UnitOutcome::Exhausted;
            }
            nonce += 1;
        }
    }
}

fn outcome_label(outcome: &UnitOutcome) -> &'static str {
    match outcome {
        UnitOutcome::Found(_) => "found",
        UnitOutcome::Cancelled => "cancelled",
        UnitOutcome::Exhausted => "exhausted",
        UnitOutcome::Failed(_) => "failed",
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "search unit panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SignerId;
    use miner_hashes::Hash;
    use std::sync::mpsc;

    /// Only `winner` hashes to zero; every other nonce hashes to all ones
    #[derive(Clone)]
    struct SingleWinner {
        winner: u64,
    }

    impl PowHasher for SingleWinner {
        fn hash(&self, _current: &Hash, _signer: &[u8; 32], nonce: u64) -> Hash {
            if nonce == self.winner {
                Hash::zeroed()
            } else {
                Hash::from_bytes([0xff; 32])
            }
        }
    }

    fn config(range: NonceRange, checkpoint_interval: u64) -> SearchUnitConfig {
        SearchUnitConfig {
            unit_id: 0,
            signer: SignerId::new([3; 32]),
            current_hash: Hash::from_low_byte(1),
            difficulty: 4,
            range,
            checkpoint_interval,
        }
    }

    fn run_unit(config: SearchUnitConfig, hasher: SingleWinner) -> Vec<UnitMessage> {
        let (tx, rx) = mpsc::channel();
        let unit = SearchUnit::new(config, hasher, Arc::new(AtomicBool::new(false)), tx);
        unit.run();
        rx.try_iter().collect()
    }

    fn exit_report(messages: &[UnitMessage]) -> &UnitReport {
        match messages.last() {
            Some(UnitMessage::Exit(report)) => report,
            other => panic!("expected exit report, got {:?}", other),
        }
    }

    #[test]
    fn test_unit_finds_winner_in_range() {
        let messages = run_unit(config(NonceRange::new(0, 99), 0), SingleWinner { winner: 42 });
        let report = exit_report(&messages);
        match &report.outcome {
            UnitOutcome::Found(proof) => {
                assert_eq!(proof.nonce, 42);
                assert_eq!(proof.hash, Hash::zeroed());
                assert_eq!(proof.difficulty, 4);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(report.iterations, 43);
        assert_eq!(report.last_nonce, Some(42));
    }

    #[test]
    fn test_unit_exhausts_range() {
        let messages = run_unit(config(NonceRange::new(50, 99), 0), SingleWinner { winner: 42 });
        let report = exit_report(&messages);
        assert_eq!(report.outcome, UnitOutcome::Exhausted);
        assert_eq!(report.iterations, 50);
        assert_eq!(report.last_nonce, Some(99));
    }

    #[test]
    fn test_unit_emits_progress() {
        let messages = run_unit(config(NonceRange::new(10, 29), 5), SingleWinner { winner: 1000 });
        let progress: Vec<u64> = messages
            .iter()
            .filter_map(|m| match m {
                UnitMessage::Progress { nonce, .. } => Some(*nonce),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![14, 19, 24, 29]);
    }

    #[test]
    fn test_unit_starts_at_range_end_of_domain() {
        let messages = run_unit(
            config(NonceRange::new(u64::MAX - 1, u64::MAX), 0),
            SingleWinner { winner: 0 },
        );
        let report = exit_report(&messages);
        assert_eq!(report.outcome, UnitOutcome::Exhausted);
        assert_eq!(report.last_nonce, Some(u64::MAX));
    }

    #[test]
    fn test_cancelled_unit_evaluates_nothing() {
        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(true));
        let unit = SearchUnit::new(
            config(NonceRange::new(0, 99), 0),
            SingleWinner { winner: 0 },
            cancel,
            tx,
        );
        unit.run();
        let messages: Vec<_> = rx.try_iter().collect();
        let report = exit_report(&messages);
        assert_eq!(report.outcome, UnitOutcome::Cancelled);
        assert_eq!(report.iterations, 0);
    }

    #[test]
    fn test_spawned_unit_reports_over_channel() {
        let (tx, rx) = mpsc::channel();
        let mut handle =
            SearchUnit::spawn(config(NonceRange::new(0, 9), 0), SingleWinner { winner: 7 }, tx)
                .unwrap();
        handle.join();
        match rx.recv().unwrap() {
            UnitMessage::Exit(report) => {
                assert!(matches!(report.outcome, UnitOutcome::Found(ref p) if p.nonce == 7))
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
}
