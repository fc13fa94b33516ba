// Read-only view of the gate for polling clients.
// Purely advisory: the gate stays the only authority on admission.

use super::gate::AdmissionGate;
use serde::Serialize;
use tracing::debug;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingStatus {
    pub processing: bool,
}

#[derive(Debug, Clone)]
pub struct StatusReporter {
    gate: AdmissionGate,
}

impl StatusReporter {
    pub fn new(gate: AdmissionGate) -> Self {
        Self { gate }
    }

    pub fn current_status(&self) -> ProcessingStatus {
        let snapshot = self.gate.snapshot();
        debug!(
            "Status polled: busy={}, last job {:?} ms",
            snapshot.busy,
            snapshot.last_processing_time.map(|d| d.as_millis())
        );
        ProcessingStatus {
            processing: snapshot.busy,
        }
    }
}
