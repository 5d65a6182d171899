//! Bus resolution and epoch waiting
//!
//! An invalid bus is the normal state around an epoch boundary, so
//! [`BusSource::find_valid_bus`] answers `None` instead of failing. Waiting for
//! the next epoch is the recovery path and only fails when the epoch source
//! itself cannot be read.

use crate::chain::{Bus, ChainClient};
use crate::errors::{ChainError, ResolveError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Longest single sleep while waiting, so an abort is noticed promptly
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Source of wall-clock time in Unix milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Caller-side cancellation of a pending submission
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Contract the retry orchestrator needs for bus resolution
pub trait BusSource {
    fn fetch_current_bus(&self) -> Result<Bus, ResolveError>;

    /// The current bus if it accepts submissions right now
    fn find_valid_bus(&self) -> Result<Option<Bus>, ResolveError>;

    /// Returns only once a new epoch has started
    fn wait_until_next_epoch(&self, abort: &AbortHandle) -> Result<(), ResolveError>;
}

/// Resolves buses by reading them from the chain
pub struct BusResolver<C: ChainClient, K: Clock = SystemClock> {
    chain: C,
    clock: K,
    poll_interval: Duration,
}

impl<C: ChainClient> BusResolver<C> {
    pub fn new(chain: C, poll_interval: Duration) -> Self {
        Self::with_clock(chain, SystemClock, poll_interval)
    }
}

impl<C: ChainClient, K: Clock> BusResolver<C, K> {
    pub fn with_clock(chain: C, clock: K, poll_interval: Duration) -> Self {
        Self {
            chain,
            clock,
            poll_interval,
        }
    }

    fn read_bus(&self) -> Result<Bus, ResolveError> {
        self.chain.fetch_bus().map_err(source_unavailable)
    }

}

/// Sleeps for `duration` in short slices, returning early on abort
pub fn sleep_unless_aborted(duration: Duration, abort: &AbortHandle) -> Result<(), ResolveError> {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if abort.is_aborted() {
            return Err(ResolveError::Abandoned);
        }
        let slice = remaining.min(MAX_SLEEP_SLICE);
        thread::sleep(slice);
        remaining -= slice;
    }
    if abort.is_aborted() {
        return Err(ResolveError::Abandoned);
    }
    Ok(())
}

impl<C: ChainClient, K: Clock> BusSource for BusResolver<C, K> {
    fn fetch_current_bus(&self) -> Result<Bus, ResolveError> {
        self.read_bus()
    }

    fn find_valid_bus(&self) -> Result<Option<Bus>, ResolveError> {
        let bus = self.read_bus()?;
        let now = self.clock.now_ms();
        if bus.is_valid_at(now) {
            Ok(Some(bus))
        } else {
            log::debug!(
                "Bus {} invalid at {} (epoch {}, rewards {}/{}, valid until {})",
                bus.id,
                now,
                bus.epoch,
                bus.rewards,
                bus.reward_rate,
                bus.valid_until_ms
            );
            Ok(None)
        }
    }

    fn wait_until_next_epoch(&self, abort: &AbortHandle) -> Result<(), ResolveError> {
        let observed = self.read_bus()?;
        let now = self.clock.now_ms();
        if observed.valid_until_ms > now {
            let wait = Duration::from_millis(observed.valid_until_ms - now);
            log::info!("Waiting {:?} for epoch {} to end", wait, observed.epoch);
            sleep_unless_aborted(wait, abort)?;
        }

        loop {
            let bus = self.read_bus()?;
            if bus.epoch > observed.epoch {
                log::info!("Epoch {} started", bus.epoch);
                return Ok(());
            }
            sleep_unless_aborted(self.poll_interval, abort)?;
        }
    }
}

fn source_unavailable(err: ChainError) -> ResolveError {
    ResolveError::SourceUnavailable(err.to_string())
}
