// Web server module
// Handles the HTTP API in front of the background removal queue

mod app;
mod error;
mod extract_request_data;
mod handlers;
mod listeners;
mod models;

pub use app::create_app;
pub use listeners::create_listener;

use crate::queue::{JobRunner, StatusReporter};
use crate::storage::ResultStore;
use std::sync::Arc;

// Maximum allowed size for image upload requests
pub const MAX_IMAGE_SIZE_BYTES: usize = 50 * 1024 * 1024; // 50MB

/// Everything the handlers need, built once at startup.
pub struct AppState {
    pub runner: JobRunner,
    pub status: StatusReporter,
    pub store: ResultStore,
    // Base used for links to processed images, e.g. "https://bg.example.com"
    pub public_url: Option<String>,
}

impl AppState {
    pub fn new(runner: JobRunner, store: ResultStore, public_url: Option<String>) -> Self {
        let status = StatusReporter::new(runner.gate().clone());
        Self {
            runner,
            status,
            store,
            public_url,
        }
    }
}

pub type SharedState = Arc<AppState>;
