use clap::Parser;
use log::{error, info, warn};
use mining::prelude::*;
use mining::{SessionSummary, SubmitError};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

/// Proof-of-work miner for the on-chain reward bus
#[derive(Parser, Debug)]
#[command(name = "miner")]
#[command(about = "Mines and submits proofs against the reward bus", long_about = None)]
struct Args {
    /// RPC server address (host:port or ws:// URL)
    #[arg(short, long, default_value = "127.0.0.1:9000")]
    rpc_addr: String,

    /// Signer address (32-byte hex)
    #[arg(short, long)]
    signer: SignerId,

    /// Mining account object id
    #[arg(short, long)]
    account: String,

    /// Number of search units (defaults to available parallelism)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Checkpoint file used to resume interrupted searches
    #[arg(long, default_value = "miner-progress.json")]
    progress_file: PathBuf,

    /// Nonces between checkpoints of the first search unit
    #[arg(long, default_value = "1048576")]
    checkpoint_interval: u64,

    /// Bus polling interval while waiting for the next epoch (milliseconds)
    #[arg(long, default_value = "2000")]
    epoch_poll_ms: u64,

    /// Number of proofs to land before exiting (0 = run forever)
    #[arg(long, default_value = "0")]
    rounds: u64,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(args.log_level.parse()?)
        .init();

    info!("Miner starting...");
    info!("RPC Address: {}", args.rpc_addr);

    let chain = Arc::new(RpcChainClient::new(RpcChainConfig {
        rpc_addr: args.rpc_addr.clone(),
        ..RpcChainConfig::default()
    })?);
    let store = Arc::new(FileProgressStore::new(args.progress_file.clone()));

    let mining_config = MiningConfig {
        num_workers: args.workers,
        checkpoint_interval: args.checkpoint_interval,
        ..MiningConfig::default()
    };
    let submission_config = SubmissionConfig {
        epoch_poll_interval: Duration::from_millis(args.epoch_poll_ms),
    };
    info!(
        "Miner config: {} search units, signer {}, progress file {}",
        mining_config.worker_count(),
        args.signer,
        args.progress_file.display()
    );

    let (events_tx, events_rx) = mpsc::channel();
    let mut engine = Engine::new(
        chain,
        store,
        KeccakPowHasher,
        mining_config,
        submission_config,
        events_tx,
    );
    let account = AccountRef(args.account.clone());

    let mut landed = 0u64;
    while args.rounds == 0 || landed < args.rounds {
        engine.handle(EngineCommand::StartMining {
            signer: args.signer,
            account: account.clone(),
        });
        let summary = engine.wait_for_mining();
        let proof = take_proof(&events_rx).ok_or_else(|| round_failure(summary.as_ref()))?;

        engine.handle(EngineCommand::SubmitProof {
            signer: args.signer,
            proof,
        });
        match engine.wait_for_submission() {
            Some(Ok(report)) => {
                landed += 1;
                info!(
                    "Round {}: proof landed in {} ({} attempt(s), {} epoch wait(s))",
                    landed, report.transaction.digest, report.attempts, report.epoch_waits
                );
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(SubmitError::InvalidResponse("proof was not submitted".to_string()).into()),
        }
        drain_events(&events_rx);
    }

    info!("Landed {} proof(s), exiting", landed);
    Ok(())
}

/// Logs pending events and returns the session's proof, if any
fn take_proof(events: &Receiver<EngineEvent>) -> Option<Proof> {
    let mut proof = None;
    for event in events.try_iter() {
        match event {
            EngineEvent::ProofFound(p) => proof = Some(p),
            other => log_event(&other),
        }
    }
    proof
}

fn drain_events(events: &Receiver<EngineEvent>) {
    for event in events.try_iter() {
        log_event(&event);
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::MiningError(msg) => warn!("Mining error: {}", msg),
        EngineEvent::ProofSubmitError(msg) => error!("Submission error: {}", msg),
        EngineEvent::StatusUpdate(status) => info!("Status {:?} ({})", status, status.code()),
        EngineEvent::RetrySubmitProof(proof) => info!("Retrying proof nonce {}", proof.nonce),
        EngineEvent::SubmissionComplete(tx) => info!("Submission complete: {}", tx.digest),
        EngineEvent::ProofFound(proof) => info!("Proof found: nonce {}", proof.nonce),
    }
}

fn round_failure(summary: Option<&SessionSummary>) -> Box<dyn std::error::Error> {
    match summary {
        Some(summary) => format!(
            "mining session {} ended without a proof after {} iterations",
            summary.session_id,
            summary.total_iterations()
        )
        .into(),
        None => "mining session could not be started".into(),
    }
}
