// Background removal backends.
// The service treats removal as an opaque, possibly slow call:
// image bytes in, PNG bytes with a transparent background out.

mod border_key;
mod command;

pub use border_key::{BorderKeyRemover, DEFAULT_TOLERANCE as DEFAULT_KEY_TOLERANCE};
pub use command::CommandRemover;

use async_trait::async_trait;
use std::fmt;

/// MIME type of everything a remover produces.
pub const OUTPUT_CONTENT_TYPE: &str = "image/png";

#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn remove_background(&self, image: &[u8]) -> Result<Vec<u8>, RemovalError>;
}

#[derive(Debug)]
pub enum RemovalError {
    // Input could not be decoded as an image
    Decode(String),
    // Result could not be encoded
    Encode(String),
    // External program could not be started or talked to
    Io(std::io::Error),
    // External program exited unsuccessfully
    CommandFailed { status: String, stderr: String },
    // Remover finished but returned nothing
    EmptyOutput,
    // Blocking worker panicked or was cancelled
    Worker(String),
}

impl fmt::Display for RemovalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(msg) => write!(f, "failed to decode input image: {}", msg),
            Self::Encode(msg) => write!(f, "failed to encode output image: {}", msg),
            Self::Io(err) => write!(f, "I/O error talking to remover: {}", err),
            Self::CommandFailed { status, stderr } if stderr.is_empty() => {
                write!(f, "remover command failed ({})", status)
            }
            Self::CommandFailed { status, stderr } => {
                write!(f, "remover command failed ({}): {}", status, stderr)
            }
            Self::EmptyOutput => write!(f, "remover produced no output"),
            Self::Worker(msg) => write!(f, "removal worker failed: {}", msg),
        }
    }
}

impl std::error::Error for RemovalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RemovalError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
