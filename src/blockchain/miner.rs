use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, info};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::Digest;

/// Hex digits in a SHA-256 digest; no hash has more leading zeros
pub const MAX_DIFFICULTY: u32 = 64;

/// Errors that can occur when starting a mining run
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MiningError {
    #[error("A mining run is already in progress")]
    AlreadyMining,
}

/// Observer of mining state transitions
///
/// Every method has an empty default, so a listener only implements what it
/// cares about. Methods are invoked from worker threads.
pub trait MinerListener: Send + Sync {
    fn on_start_mining(&self, _message: &[u8], _difficulty: u32) {}

    fn on_stop_mining(&self, _nonce: u64) {}

    fn on_nonce_found(&self, _nonce: u64) {}
}

/// State of the coordinator's current (or last) run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", content = "nonce", rename_all = "snake_case")]
pub enum MiningState {
    Idle,
    Working,
    Found(u64),
    Cancelled(u64),
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningOutcome {
    Found(u64),
    Cancelled(u64),
}

/// Snapshot returned by `getMiningStatus`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MiningStatus {
    /// Current state of the run
    pub state: MiningState,

    /// Difficulty of the current or last run
    pub difficulty: Option<u32>,

    /// Number of worker threads
    pub workers: usize,
}

/// Atomics shared by the workers of one run
#[derive(Debug, Default)]
struct MinerShared {
    ticket: AtomicU64,
    finished: AtomicBool,
    stopped: AtomicBool,
    nonce: AtomicU64,
}

impl MinerShared {
    fn reset(&self, seed: u64) {
        self.ticket.store(seed, Ordering::SeqCst);
        self.nonce.store(0, Ordering::SeqCst);
        self.stopped.store(false, Ordering::SeqCst);
        self.finished.store(false, Ordering::SeqCst);
    }

    /// First caller wins; later callers get `false`
    fn finish(&self, nonce: u64) -> bool {
        if self
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.nonce.store(nonce, Ordering::Release);
            true
        } else {
            false
        }
    }
}

/// Runs a parallel nonce search and arbitrates between finding and stopping
pub struct MiningCoordinator {
    workers: usize,
    shared: MinerShared,
    state: Mutex<MiningState>,
    difficulty: Mutex<Option<u32>>,
    listener: Option<Arc<dyn MinerListener>>,
}

impl std::fmt::Debug for MiningCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiningCoordinator")
            .field("workers", &self.workers)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl MiningCoordinator {
    /// Creates a coordinator with `workers` threads (at least one)
    pub fn new(workers: usize) -> Self {
        MiningCoordinator {
            workers: workers.max(1),
            shared: MinerShared::default(),
            state: Mutex::new(MiningState::Idle),
            difficulty: Mutex::new(None),
            listener: None,
        }
    }

    pub fn with_listener(workers: usize, listener: Arc<dyn MinerListener>) -> Self {
        MiningCoordinator {
            listener: Some(listener),
            ..Self::new(workers)
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn state(&self) -> MiningState {
        *self.state.lock()
    }

    pub fn is_mining(&self) -> bool {
        self.state() == MiningState::Working
    }

    pub fn status(&self) -> MiningStatus {
        MiningStatus {
            state: self.state(),
            difficulty: *self.difficulty.lock(),
            workers: self.workers,
        }
    }

    /// Claims the coordinator for a new run
    ///
    /// Returns `false` when a run is already in progress. After a successful
    /// claim `stop` is effective even before the search itself begins.
    pub fn try_begin(&self) -> bool {
        let mut state = self.state.lock();
        if *state == MiningState::Working {
            return false;
        }

        let seed = rand::thread_rng().gen::<u32>() as u64;
        self.shared.reset(seed);
        *state = MiningState::Working;
        true
    }

    /// Searches for a nonce such that `H(message ‖ nonce)` has at least
    /// `difficulty` leading zero hex digits
    pub fn mine(&self, message: &[u8], difficulty: u32) -> Result<MiningOutcome, MiningError> {
        if !self.try_begin() {
            return Err(MiningError::AlreadyMining);
        }
        Ok(self.search(message, difficulty))
    }

    /// Runs the search of a run claimed with `try_begin`
    pub fn search(&self, message: &[u8], difficulty: u32) -> MiningOutcome {
        *self.difficulty.lock() = Some(difficulty);

        if let Some(listener) = &self.listener {
            listener.on_start_mining(message, difficulty);
        }
        info!(
            "Mining started with {} worker(s) at difficulty {}",
            self.workers, difficulty
        );

        let shared = &self.shared;
        thread::scope(|scope| {
            for worker in 0..self.workers {
                scope.spawn(move || self.work(worker, shared, message, difficulty));
            }
        });

        // `stop` sets its flags while holding the state lock
        let mut state = self.state.lock();
        let nonce = self.shared.nonce.load(Ordering::Acquire);
        let outcome = if self.shared.stopped.load(Ordering::Acquire) {
            MiningOutcome::Cancelled(nonce)
        } else {
            MiningOutcome::Found(nonce)
        };

        *state = match outcome {
            MiningOutcome::Found(nonce) => MiningState::Found(nonce),
            MiningOutcome::Cancelled(nonce) => MiningState::Cancelled(nonce),
        };

        outcome
    }

    fn work(&self, worker: usize, shared: &MinerShared, message: &[u8], difficulty: u32) {
        let mut attempts = 0u64;
        while !shared.finished.load(Ordering::Acquire) {
            let nonce = shared.ticket.fetch_add(1, Ordering::Relaxed);
            attempts += 1;

            if !meets_difficulty(&hash_with_nonce(message, nonce), difficulty) {
                continue;
            }

            if shared.finish(nonce) {
                info!("Worker {} found nonce {} after {} attempts", worker, nonce, attempts);
                if let Some(listener) = &self.listener {
                    listener.on_nonce_found(nonce);
                }
            }
            break;
        }
        debug!("Worker {} exiting after {} attempts", worker, attempts);
    }

    /// Cancels the running search, recording `nonce` as the poison value
    ///
    /// Returns `false` (and does nothing) when no run is in progress or the
    /// run already ended. The state stays `Working` until the workers have
    /// exited and `search` records the cancellation.
    pub fn stop(&self, nonce: u64) -> bool {
        let state = self.state.lock();
        if *state != MiningState::Working {
            return false;
        }

        if !self.shared.finish(nonce) {
            // a worker got there first; the run ends as found
            return false;
        }
        self.shared.stopped.store(true, Ordering::Release);
        drop(state);

        info!("Mining stopped with nonce {}", nonce);
        if let Some(listener) = &self.listener {
            listener.on_stop_mining(nonce);
        }
        true
    }
}

/// `H(message ‖ nonce)` with the nonce as 8 big-endian bytes
pub fn hash_with_nonce(message: &[u8], nonce: u64) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(message);
    hasher.update(nonce.to_be_bytes());
    Digest(hasher.finalize().into())
}

pub fn meets_difficulty(hash: &Digest, difficulty: u32) -> bool {
    hash.leading_zero_digits() >= difficulty
}
