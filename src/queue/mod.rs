// Single-concurrency job queue in front of the background remover

pub mod gate;
mod runner;
mod status;

pub use gate::AdmissionGate;
pub use runner::{Job, JobRunner, SubmitError};
pub use status::{ProcessingStatus, StatusReporter};
