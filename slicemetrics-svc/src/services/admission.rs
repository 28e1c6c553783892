//! Admission pool for slicer invocations
//!
//! A counting semaphore caps concurrent slicer processes. When every slot is
//! busy the configured policy decides: `reject` fails at once, `queue` waits
//! in a bounded FIFO queue until a slot frees up or the job's deadline
//! passes. The deadline is fixed at admission, so time spent queued counts
//! against the job's timeout.
//!
//! This module knows nothing about processes; the process manager only sees
//! a permit.

use slicemetrics_common::config::{AdmissionConfig, AdmissionPolicy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("all {capacity} slicer slots busy, {queued} jobs queued")]
    Overloaded { capacity: usize, queued: usize },

    #[error("deadline expired after waiting {waited_ms} ms for a slicer slot")]
    DeadlineExpired { waited_ms: u64 },

    #[error("admission pool closed")]
    Closed,
}

/// A held slot; dropping it frees the slot for the next queued job
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    waited: Duration,
}

impl AdmissionPermit {
    /// Time spent queued before the slot was granted
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

/// Decrements the waiting counter when a queued acquire ends, however it ends
struct QueueSlot<'a> {
    waiting: &'a AtomicUsize,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionPool {
    semaphore: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    capacity: usize,
    policy: AdmissionPolicy,
    max_queue: usize,
}

impl AdmissionPool {
    pub fn new(capacity: usize, policy: AdmissionPolicy, max_queue: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            waiting: Arc::new(AtomicUsize::new(0)),
            capacity,
            policy,
            max_queue,
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(config.capacity, config.policy, config.max_queue)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Slots currently held
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }

    /// Jobs currently waiting for a slot
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Acquire a slot, waiting no later than `deadline` under the queue policy
    pub async fn acquire(&self, deadline: Instant) -> Result<AdmissionPermit, AdmissionError> {
        let started = Instant::now();

        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                return Ok(AdmissionPermit {
                    _permit: permit,
                    waited: Duration::ZERO,
                })
            }
            Err(TryAcquireError::Closed) => return Err(AdmissionError::Closed),
            Err(TryAcquireError::NoPermits) => {}
        }

        if self.policy == AdmissionPolicy::Reject {
            tracing::warn!(capacity = self.capacity, "Slicer slots exhausted, rejecting job");
            return Err(AdmissionError::Overloaded {
                capacity: self.capacity,
                queued: self.queued(),
            });
        }

        // Reserve a queue position atomically so concurrent callers cannot
        // overshoot max_queue
        let max_queue = self.max_queue;
        let reserved = self
            .waiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_queue).then_some(n + 1)
            });
        if reserved.is_err() {
            tracing::warn!(
                capacity = self.capacity,
                max_queue = self.max_queue,
                "Slicer queue full, rejecting job"
            );
            return Err(AdmissionError::Overloaded {
                capacity: self.capacity,
                queued: self.queued(),
            });
        }
        let _slot = QueueSlot {
            waiting: &self.waiting,
        };

        tracing::debug!(queued = self.queued(), "Waiting for slicer slot");

        match tokio::time::timeout_at(deadline, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(AdmissionPermit {
                _permit: permit,
                waited: started.elapsed(),
            }),
            Ok(Err(_closed)) => Err(AdmissionError::Closed),
            Err(_elapsed) => Err(AdmissionError::DeadlineExpired {
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }
}
