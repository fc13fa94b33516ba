// Persists processed images to the output directory and reads them back
// for the /images-output route.

use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    InvalidName(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "output storage I/O error: {}", err),
            Self::InvalidName(name) => write!(f, "invalid output file name: {:?}", name),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Opens the store, creating the directory if it does not exist yet.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!("Processed images will be stored in {}", dir.display());
        Ok(Self { dir })
    }

    /// Writes a processed PNG and returns its file name.
    pub async fn save(&self, png: &[u8]) -> Result<String, StorageError> {
        let file_name = format!("output-{}.png", Uuid::new_v4());
        tokio::fs::write(self.dir.join(&file_name), png).await?;
        debug!("Stored {} ({} bytes)", file_name, png.len());
        Ok(file_name)
    }

    /// Reads a stored file. `Ok(None)` when it does not exist.
    pub async fn load(&self, file_name: &str) -> Result<Option<(Vec<u8>, &'static str)>, StorageError> {
        validate_file_name(file_name)?;

        let data = match tokio::fs::read(self.dir.join(file_name)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let content_type = image::ImageFormat::from_path(file_name)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream");
        Ok(Some((data, content_type)))
    }
}

// Only bare file names are served; anything that could walk out of the
// output directory is refused.
fn validate_file_name(file_name: &str) -> Result<(), StorageError> {
    let bad = file_name.is_empty()
        || file_name.starts_with('.')
        || file_name.contains(['/', '\\', '\0']);
    if bad {
        return Err(StorageError::InvalidName(file_name.to_string()));
    }
    Ok(())
}
