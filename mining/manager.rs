//! Mining coordinator that partitions the nonce space and collects results
//!
//! The coordinator fetches the target hash and difficulty, splits the nonce
//! domain across search units, and runs a control thread that owns every unit
//! handle. The first proof wins: siblings are cancelled and exactly one
//! `ProofFound` event is emitted per session.

use crate::chain::ChainClient;
use crate::errors::{MiningError, UnitError};
use crate::events::EngineEvent;
use crate::job::{AccountRef, MiningSession, NonceRange, Proof, SearchUnitConfig, SessionId, SignerId};
use crate::pow::ProofOfWork;
use crate::progress::ProgressStore;
use crate::worker::{SearchUnit, UnitHandle, UnitMessage, UnitOutcome, UnitReport};
use miner_hashes::PowHasher;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Worker count used when host parallelism cannot be determined
pub const FALLBACK_WORKERS: usize = 4;

/// Size of the full u64 nonce domain
pub const FULL_NONCE_DOMAIN: u128 = 1 << 64;

/// How often the control thread looks at the stop flag while idle
const CONTROL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for the mining coordinator
#[derive(Clone, Debug)]
pub struct MiningConfig {
    /// Number of search units; `None` uses the host's available parallelism
    pub num_workers: Option<usize>,
    /// Number of nonces partitioned across units, starting at zero
    pub domain_size: u128,
    /// Unit 0 reports its position every this many nonces (0 disables checkpoints)
    pub checkpoint_interval: u64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            num_workers: None,
            domain_size: FULL_NONCE_DOMAIN,
            checkpoint_interval: 1 << 20,
        }
    }
}

impl MiningConfig {
    pub fn worker_count(&self) -> usize {
        match self.num_workers {
            Some(n) if n > 0 => n,
            _ => available_parallelism(),
        }
    }
}

/// Host hardware concurrency, or [`FALLBACK_WORKERS`] when unknown
pub fn available_parallelism() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(FALLBACK_WORKERS)
}

/// Splits `[0, domain_size)` into `workers` contiguous, disjoint ranges.
///
/// Unit `i` starts at `i * floor(domain_size / workers)`; the last unit also
/// covers the remainder. Domains larger than 2^64 are clamped, and when there
/// are more workers than nonces only `domain_size` single-nonce ranges are
/// returned.
pub fn partition(domain_size: u128, workers: usize) -> Vec<NonceRange> {
    let domain_size = domain_size.min(FULL_NONCE_DOMAIN);
    let workers = (workers.max(1) as u128).min(domain_size);
    if workers == 0 {
        return Vec::new();
    }

    let stride = domain_size / workers;
    (0..workers)
        .map(|i| {
            let start = i * stride;
            let end = if i + 1 == workers {
                domain_size - 1
            } else {
                (i + 1) * stride - 1
            };
            NonceRange::new(start as u64, end as u64)
        })
        .collect()
}

/// Statistics for a finished mining session
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub worker_count: usize,
    pub duration_ms: u64,
    pub proof: Option<Proof>,
    pub reports: Vec<UnitReport>,
}

impl SessionSummary {
    pub fn total_iterations(&self) -> u64 {
        self.reports.iter().map(|r| r.iterations).sum()
    }

    pub fn overall_hash_rate(&self) -> f64 {
        ProofOfWork::calculate_hash_rate(self.total_iterations(), self.duration_ms)
    }

    /// Units that terminated because they were cancelled
    pub fn cancelled_units(&self) -> Vec<usize> {
        self.reports
            .iter()
            .filter(|r| r.outcome == UnitOutcome::Cancelled)
            .map(|r| r.unit)
            .collect()
    }

    /// Formats session stats as a readable string
    pub fn format_summary(&self) -> String {
        format!(
            "Mining Session Stats:\n  Session: {}\n  Duration: {}ms\n  Proof: {}\n  \
             Total Iterations: {}\n  Workers: {}\n  Overall Hash Rate: {:.2} MH/s",
            self.session_id,
            self.duration_ms,
            self.proof
                .as_ref()
                .map(|p| format!("nonce {}", p.nonce))
                .unwrap_or_else(|| "none".to_string()),
            self.total_iterations(),
            self.worker_count,
            self.overall_hash_rate() / 1_000_000.0
        )
    }
}

/// Handle of the running control thread
struct ActiveSession {
    id: SessionId,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<SessionSummary>,
}

/// Coordinates search units for one mining session at a time
pub struct MiningCoordinator<C, S, H>
where
    C: ChainClient,
    S: ProgressStore + 'static,
    H: PowHasher,
{
    config: MiningConfig,
    chain: C,
    store: Arc<S>,
    hasher: H,
    events: Sender<EngineEvent>,
    session: Option<ActiveSession>,
    last_summary: Option<SessionSummary>,
}

impl<C, S, H> MiningCoordinator<C, S, H>
where
    C: ChainClient,
    S: ProgressStore + 'static,
    H: PowHasher,
{
    pub fn new(
        config: MiningConfig,
        chain: C,
        store: Arc<S>,
        hasher: H,
        events: Sender<EngineEvent>,
    ) -> Self {
        Self {
            config,
            chain,
            store,
            hasher,
            events,
            session: None,
            last_summary: None,
        }
    }

    /// Fetches the account's target hash and the bus difficulty, then
    /// dispatches one search unit per partition.
    ///
    /// Fails without spawning anything if a session is still running or the
    /// account cannot be read.
    pub fn start_mining(
        &mut self,
        signer: SignerId,
        account: &AccountRef,
    ) -> Result<SessionId, MiningError> {
        self.reap_finished();
        if self.session.is_some() {
            return Err(MiningError::SessionActive);
        }
        if account.0.trim().is_empty() {
            return Err(MiningError::Configuration("missing mining account".to_string()));
        }

        let miner = self
            .chain
            .fetch_account(account)
            .map_err(MiningError::AccountFetch)?;
        let bus = self.chain.fetch_bus().map_err(MiningError::BusFetch)?;

        let mut session = MiningSession::new(signer, miner.current_hash, bus.difficulty, 0);
        let resume = match self.store.load(&session.id) {
            Ok(resume) => resume,
            Err(e) => {
                log::warn!("Ignoring unreadable checkpoint for {}: {}", session.id, e);
                None
            }
        };

        let worker_count = self.config.worker_count();
        let mut ranges = partition(self.config.domain_size, worker_count);
        if ranges.is_empty() {
            return Err(MiningError::Configuration("nonce domain is empty".to_string()));
        }
        if let Some(nonce) = resume {
            // Single resume point: only unit 0 continues from the checkpoint
            ranges[0].start = ranges[0].start.max(nonce);
            session.advance(nonce);
            log::info!("Resuming session {} from nonce {}", session.id, nonce);
        }

        log::info!(
            "Starting session {} with {} search units at difficulty {}",
            session.id,
            ranges.len(),
            session.difficulty
        );

        let (result_tx, result_rx) = mpsc::channel();
        let mut units = Vec::with_capacity(ranges.len());
        for (unit_id, range) in ranges.into_iter().enumerate() {
            let config = SearchUnitConfig {
                unit_id,
                signer: session.signer,
                current_hash: session.current_hash,
                difficulty: session.difficulty,
                range,
                checkpoint_interval: if unit_id == 0 {
                    self.config.checkpoint_interval
                } else {
                    0
                },
            };
            // Already spawned units are cancelled and joined when `units` drops
            let handle = SearchUnit::spawn(config, self.hasher.clone(), result_tx.clone())
                .map_err(|source| MiningError::Spawn {
                    unit: unit_id,
                    source,
                })?;
            units.push(handle);
        }
        drop(result_tx);

        let id = session.id.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let control = SessionControl {
            session,
            units,
            result_rx,
            stop: Arc::clone(&stop),
            store: Arc::clone(&self.store),
            hasher: self.hasher.clone(),
            events: self.events.clone(),
            proof: None,
            reports: Vec::new(),
            started: Instant::now(),
        };

        let thread = thread::Builder::new()
            .name("mining-coordinator".to_string())
            .spawn(move || control.run())
            .map_err(|source| MiningError::Spawn {
                unit: worker_count,
                source,
            })?;

        self.session = Some(ActiveSession {
            id: id.clone(),
            stop,
            thread,
        });
        Ok(id)
    }

    /// Cancels every active unit and waits until all of them have exited.
    ///
    /// Calling this without an active session is a no-op.
    pub fn stop_mining(&mut self) -> Option<SessionSummary> {
        let Some(session) = self.session.take() else {
            log::debug!("stop_mining called without an active session");
            return None;
        };

        log::info!("Stopping mining session {}", session.id);
        session.stop.store(true, Ordering::Relaxed);
        self.finish(session)
    }

    /// Blocks until the current session ends on its own
    pub fn wait_for_session(&mut self) -> Option<SessionSummary> {
        let session = self.session.take()?;
        self.finish(session)
    }

    /// True while a session's control thread is running
    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| !s.thread.is_finished())
            .unwrap_or(false)
    }

    /// Summary of the most recently finished session
    pub fn last_summary(&mut self) -> Option<&SessionSummary> {
        self.reap_finished();
        self.last_summary.as_ref()
    }

    pub fn worker_count(&self) -> usize {
        self.config.worker_count()
    }

    fn reap_finished(&mut self) {
        if self.session.as_ref().is_some_and(|s| s.thread.is_finished()) {
            if let Some(session) = self.session.take() {
                self.finish(session);
            }
        }
    }

    fn finish(&mut self, session: ActiveSession) -> Option<SessionSummary> {
        match session.thread.join() {
            Ok(summary) => {
                log::info!("{}", summary.format_summary());
                self.last_summary = Some(summary.clone());
                Some(summary)
            }
            Err(_) => {
                log::error!("Coordinator thread for {} panicked", session.id);
                None
            }
        }
    }
}

impl<C, S, H> Drop for MiningCoordinator<C, S, H>
where
    C: ChainClient,
    S: ProgressStore + 'static,
    H: PowHasher,
{
    fn drop(&mut self) {
        self.stop_mining();
    }
}

/// State owned by the control thread for the lifetime of one session
struct SessionControl<S: ProgressStore, H: PowHasher> {
    session: MiningSession,
    /// Unit handles indexed by dispatch order
    units: Vec<UnitHandle>,
    result_rx: Receiver<UnitMessage>,
    stop: Arc<AtomicBool>,
    store: Arc<S>,
    hasher: H,
    events: Sender<EngineEvent>,
    proof: Option<Proof>,
    reports: Vec<UnitReport>,
    started: Instant,
}

impl<S: ProgressStore, H: PowHasher> SessionControl<S, H> {
    fn run(mut self) -> SessionSummary {
        let mut stopping = false;

        while self.reports.len() < self.units.len() {
            if !stopping && self.stop.load(Ordering::Relaxed) {
                self.cancel_all();
                stopping = true;
            }

            match self.result_rx.recv_timeout(CONTROL_POLL_INTERVAL) {
                Ok(UnitMessage::Progress { unit, nonce }) => self.record_progress(unit, nonce),
                Ok(UnitMessage::Exit(report)) => self.handle_exit(report),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let worker_count = self.units.len();
        for unit in self.units.iter_mut() {
            unit.join();
        }
        self.units.clear();

        SessionSummary {
            session_id: self.session.id.clone(),
            worker_count,
            duration_ms: self.started.elapsed().as_millis() as u64,
            proof: self.proof.take(),
            reports: std::mem::take(&mut self.reports),
        }
    }

    fn record_progress(&mut self, unit: usize, nonce: u64) {
        // Only unit 0 owns the resume point
        if unit != 0 || self.proof.is_some() || !self.session.advance(nonce) {
            return;
        }
        if let Err(e) = self.store.save(&self.session.id, nonce) {
            log::warn!("Failed to persist checkpoint for {}: {}", self.session.id, e);
        }
    }

    fn handle_exit(&mut self, report: UnitReport) {
        match &report.outcome {
            UnitOutcome::Found(proof) => self.handle_proof(report.unit, proof.clone()),
            UnitOutcome::Failed(reason) => {
                let err = UnitError {
                    unit: report.unit,
                    reason: reason.clone(),
                };
                log::warn!("{}", err);
                self.emit(EngineEvent::MiningError(err.to_string()));
            }
            UnitOutcome::Cancelled => {
                if let Some(nonce) = report.last_nonce {
                    self.record_progress(report.unit, nonce);
                }
                log::debug!("Search unit {} cancelled", report.unit);
            }
            UnitOutcome::Exhausted => {
                log::debug!("Search unit {} exhausted its range", report.unit);
            }
        }
        self.reports.push(report);
    }

    fn handle_proof(&mut self, unit: usize, proof: Proof) {
        if self.proof.is_some() {
            log::warn!("Ignoring late proof from search unit {} (nonce {})", unit, proof.nonce);
            return;
        }
        if !ProofOfWork::verify_proof(&self.hasher, &proof) {
            let err = UnitError {
                unit,
                reason: format!("reported nonce {} does not satisfy difficulty", proof.nonce),
            };
            log::error!("{}", err);
            self.emit(EngineEvent::MiningError(err.to_string()));
            return;
        }

        self.cancel_all();
        if let Err(e) = self.store.clear(&self.session.id) {
            log::warn!("Failed to clear checkpoint for {}: {}", self.session.id, e);
        }

        log::info!(
            "Proof found by search unit {}: nonce {} hash {}",
            unit,
            proof.nonce,
            proof.hash
        );
        self.proof = Some(proof.clone());
        self.emit(EngineEvent::ProofFound(proof));
    }

    fn cancel_all(&self) {
        for unit in &self.units {
            unit.cancel();
        }
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            log::debug!("Event receiver dropped; discarding event");
        }
    }
}
