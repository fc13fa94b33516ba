// Single-slot admission gate.
// At most one job holds the gate at a time; everyone else is turned away
// immediately with the duration of the last completed job.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

// Process-wide queue state. Only the gate and its permits touch it.
#[derive(Debug, Default)]
struct QueueState {
    busy: bool,
    last_processing_time: Option<Duration>,
}

/// Point-in-time view of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub busy: bool,
    pub last_processing_time: Option<Duration>,
}

/// Result of an admission attempt.
#[derive(Debug)]
pub enum Admission {
    /// The caller now owns the gate until the permit is released or dropped.
    Admitted(GatePermit),
    /// Another job is running.
    Rejected {
        last_processing_time: Option<Duration>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct AdmissionGate {
    state: Arc<Mutex<QueueState>>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks and sets `busy` in a single critical section.
    ///
    /// There is no await point between the read and the write, and the mutex
    /// covers the case where handlers run on several runtime threads.
    pub fn try_admit(&self) -> Admission {
        let mut state = self.lock();
        if state.busy {
            debug!("Admission rejected: gate is busy");
            return Admission::Rejected {
                last_processing_time: state.last_processing_time,
            };
        }
        state.busy = true;
        drop(state);

        debug!("Admission granted");
        Admission::Admitted(GatePermit {
            state: Some(self.state.clone()),
            admitted_at: Instant::now(),
        })
    }

    /// Pure read of the current state; never blocks on a running job.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            busy: state.busy,
            last_processing_time: state.last_processing_time,
        }
    }

    // The state is two plain fields that are never left half-written,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Proof of admission. Releasing it (or dropping it) frees the gate exactly once.
#[derive(Debug)]
#[must_use = "dropping the permit releases the gate immediately"]
pub struct GatePermit {
    state: Option<Arc<Mutex<QueueState>>>,
    admitted_at: Instant,
}

impl GatePermit {
    /// Time since this permit was granted.
    pub fn elapsed(&self) -> Duration {
        self.admitted_at.elapsed()
    }

    /// Frees the gate and records `duration` as the last processing time.
    pub fn release(mut self, duration: Duration) {
        self.release_inner(duration);
    }

    fn release_inner(&mut self, duration: Duration) {
        if let Some(state) = self.state.take() {
            let mut state = lock_state(&state);
            state.busy = false;
            state.last_processing_time = Some(duration);
            debug!("Gate released after {} ms", duration.as_millis());
        }
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let elapsed = self.elapsed();
        self.release_inner(elapsed);
    }
}
