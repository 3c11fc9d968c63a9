//! Scoring Worker Pool
//!
//! Live measurements are scored off the caller's path. Jobs go through a
//! bounded queue; a full queue rejects instead of blocking. A dispatcher
//! task keeps at most `workers` jobs running on the blocking pool, and
//! every accepted job hands back a ticket that resolves when it is done.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use super::config::PoolConfig;
use super::pipeline::{LiveOutcome, ScoringPipeline};
use super::store::{DeviceId, Measurement};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("scoring queue is full")]
    Saturated,
    #[error("scoring pool is shut down")]
    ShutDown,
}

/// Completion signal for one accepted job. Dropping it does not cancel the job.
#[derive(Debug)]
pub struct ScoringTicket {
    device_id: DeviceId,
    done: oneshot::Receiver<LiveOutcome>,
}

impl ScoringTicket {
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Wait for the job. `None` if it was lost (the scoring task panicked).
    pub async fn wait(self) -> Option<LiveOutcome> {
        self.done.await.ok()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Accepted and not yet finished
    pub pending: u64,
    pub completed: u64,
    pub rejected: u64,
}

#[derive(Default)]
struct PoolCounters {
    pending: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
}

struct Job {
    measurement: Measurement,
    done: oneshot::Sender<LiveOutcome>,
}

/// Releases one pending slot when dropped, including during a panic
struct PendingGuard(Arc<PoolCounters>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// POOL
// ============================================================================

pub struct ScoringPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
}

impl ScoringPool {
    /// Spawn the dispatcher. Must be called from within a tokio runtime.
    pub fn start(pipeline: ScoringPipeline, config: PoolConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(PoolCounters::default());

        let dispatcher = tokio::spawn(dispatch_loop(
            receiver,
            pipeline,
            config.workers.max(1),
            counters.clone(),
        ));

        log::info!(
            "Scoring pool started (workers: {}, queue: {})",
            config.workers, config.queue_capacity
        );

        Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
            counters,
        }
    }

    /// Queue a stored measurement for scoring and recording
    pub fn submit(&self, measurement: Measurement) -> Result<ScoringTicket, SubmitError> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(SubmitError::ShutDown);
        };

        let device_id = measurement.device_id;
        let (done, receiver) = oneshot::channel();

        // Counted before sending so a fast job cannot release it first
        self.counters.pending.fetch_add(1, Ordering::SeqCst);

        match sender.try_send(Job { measurement, done }) {
            Ok(()) => Ok(ScoringTicket { device_id, done: receiver }),
            Err(TrySendError::Full(_)) => {
                self.counters.pending.fetch_sub(1, Ordering::SeqCst);
                self.counters.rejected.fetch_add(1, Ordering::SeqCst);
                log::warn!("Scoring queue full, rejecting job for device {}", device_id);
                Err(SubmitError::Saturated)
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.pending.fetch_sub(1, Ordering::SeqCst);
                Err(SubmitError::ShutDown)
            }
        }
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            pending: self.counters.pending.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn shutdown(&self) {
        // Closing the channel ends the dispatcher once the queue drains
        self.sender.lock().take();

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                log::error!("Scoring dispatcher failed: {}", e);
            }
            log::info!("Scoring pool stopped ({} jobs completed)", self.status().completed);
        }
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

async fn dispatch_loop(
    mut receiver: mpsc::Receiver<Job>,
    pipeline: ScoringPipeline,
    workers: usize,
    counters: Arc<PoolCounters>,
) {
    let mut running = JoinSet::new();

    while let Some(job) = receiver.recv().await {
        while running.len() >= workers {
            if let Some(result) = running.join_next().await {
                report(result);
            }
        }

        let pipeline = pipeline.clone();
        let counters = counters.clone();
        running.spawn_blocking(move || {
            let Job { measurement, done } = job;
            // Declared after `done` so an unwind releases the slot before the ticket resolves
            let pending = PendingGuard(counters.clone());

            let outcome = pipeline.score_and_record(&measurement);
            counters.completed.fetch_add(1, Ordering::SeqCst);
            drop(pending);
            // The caller may have dropped its ticket
            let _ = done.send(outcome);
        });
    }

    while let Some(result) = running.join_next().await {
        report(result);
    }
}

fn report(result: Result<(), JoinError>) {
    if let Err(e) = result {
        log::error!("Scoring task failed: {}", e);
    }
}
