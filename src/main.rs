// Main entry point for bgremove-server.
// Sets up logging, builds the removal backend and the single-slot job queue,
// configures the Axum router, and starts the HTTP server.

mod queue;
mod removal;
mod shutdown_signal;
mod storage;
mod web;

use clap::{Parser, ValueEnum};
use queue::{AdmissionGate, JobRunner};
use removal::{BackgroundRemover, BorderKeyRemover, CommandRemover};
use std::{path::PathBuf, sync::Arc, time::Duration};
use storage::ResultStore;
use tracing::Level;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RemoverKind {
    /// Built-in remover that keys out the border colour
    BorderKey,
    /// External program reading the image on stdin and writing a PNG to stdout
    Command,
}

/// Command line arguments for bgremove-server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct AppConfig {
    /// Hostname/IP to bind the server to.
    /// If this option is specified without value, it will default to "*", meaning the server will listen on all interfaces.
    #[arg(long, env = "BGREMOVE_SERVER_HOST", default_value = "localhost", num_args = 0..=1, default_missing_value = "*")]
    host: String,

    /// Port number to listen on.
    #[arg(short, long, env = "BGREMOVE_SERVER_PORT", default_value_t = 3001)]
    port: u16,

    /// Directory where processed images are stored and served from.
    #[arg(long, env = "BGREMOVE_SERVER_OUTPUT_DIR", default_value = "images-output")]
    output_dir: PathBuf,

    /// Public base URL used in links to processed images (e.g. https://bg.example.com).
    /// Defaults to http://<Host header>.
    #[arg(long, env = "BGREMOVE_SERVER_PUBLIC_URL")]
    public_url: Option<String>,

    /// Give up on a removal job after this many seconds and free the queue.
    /// Without it a hung remover keeps the service busy forever.
    #[arg(long, env = "BGREMOVE_SERVER_JOB_TIMEOUT_SECS")]
    job_timeout_secs: Option<u64>,

    /// Background removal backend.
    #[arg(long, env = "BGREMOVE_SERVER_REMOVER", value_enum, default_value_t = RemoverKind::BorderKey)]
    remover: RemoverKind,

    /// Program to run when --remover=command.
    #[arg(long, env = "BGREMOVE_SERVER_REMOVER_COMMAND")]
    remover_command: Option<PathBuf>,

    /// Argument passed to the remover command. Repeat for several arguments.
    #[arg(long = "remover-arg", allow_hyphen_values = true)]
    remover_args: Vec<String>,

    /// Colour tolerance (0-255 per channel) for the border-key remover.
    #[arg(long, env = "BGREMOVE_SERVER_KEY_TOLERANCE", default_value_t = removal::DEFAULT_KEY_TOLERANCE)]
    key_tolerance: u8,

    /// Maximum log level (error, warn, info, debug, trace).
    #[arg(long, env = "BGREMOVE_SERVER_LOG_LEVEL", default_value = "info")]
    log_level: Level,
}

impl AppConfig {
    fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    fn build_remover(&self) -> Result<Arc<dyn BackgroundRemover>, String> {
        match self.remover {
            RemoverKind::BorderKey => Ok(Arc::new(BorderKeyRemover::new(self.key_tolerance))),
            RemoverKind::Command => {
                let program = self
                    .remover_command
                    .clone()
                    .ok_or("--remover=command requires --remover-command")?;
                Ok(Arc::new(CommandRemover::new(
                    program,
                    self.remover_args.clone(),
                )))
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // Parse command line args and environment variables
    let config = AppConfig::parse();

    // Initialize tracing subscriber for structured logging.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_target(true) // Include module path in logs
        .with_file(true) // Include source file name
        .with_line_number(true) // Include line numbers
        .init();

    tracing::info!("Starting bgremove-server...");

    let remover = config.build_remover().unwrap_or_else(|err| {
        tracing::error!("FATAL: Invalid remover configuration: {}", err);
        eprintln!("FATAL: {}. Exiting.", err);
        std::process::exit(1);
    });
    tracing::info!("Using '{}' background remover", remover.name());

    let job_timeout = config.job_timeout();
    match job_timeout {
        Some(limit) => tracing::info!("Removal jobs time out after {} s", limit.as_secs()),
        None => tracing::warn!(
            "No job timeout configured; a hung remover will keep the service busy until restart"
        ),
    }

    let store = ResultStore::open(&config.output_dir)
        .await
        .unwrap_or_else(|err| {
            tracing::error!("FATAL: Failed to prepare output directory: {}", err);
            eprintln!("FATAL: Could not prepare output directory. Error: {}. Exiting.", err);
            std::process::exit(1);
        });

    let runner = JobRunner::new(AdmissionGate::new(), remover, job_timeout);
    let state = Arc::new(web::AppState::new(
        runner,
        store,
        config.public_url.clone(),
    ));

    let app = web::create_app(state);
    tracing::info!("Axum router configured.");

    // --- Start HTTP Server ---
    let listener = match web::create_listener(&config.host, config.port).await {
        Ok((addr, l)) => {
            tracing::info!("Server successfully bound. Listening on {}", addr);
            l
        }
        Err(e) => {
            tracing::error!("FATAL: Failed to bind server: {}", e);
            eprintln!("FATAL: Could not bind server. Error: {}. Exiting.", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal::shutdown_signal())
        .await
    {
        tracing::error!("Server run error: {}", e);
        eprintln!("ERROR: Server shut down unexpectedly. Error: {}", e);
    }

    tracing::info!("bgremove-server has shut down.");
}
