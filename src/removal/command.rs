// Remover backed by an external program (e.g. a `rembg`-style CLI).
// The image is written to the child's stdin and the result read from stdout.

use super::{BackgroundRemover, RemovalError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CommandRemover {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandRemover {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl BackgroundRemover for CommandRemover {
    fn name(&self) -> &str {
        "command"
    }

    async fn remove_background(&self, image: &[u8]) -> Result<Vec<u8>, RemovalError> {
        debug!("Spawning remover command: {:?} {:?}", self.program, self.args);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out job drops this future; take the child down with it.
            .kill_on_drop(true)
            .spawn()?;

        // Feed stdin concurrently with draining stdout so large images can't
        // deadlock on a full pipe.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RemovalError::Worker("child stdin was not captured".to_string()))?;
        let input = image.to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;

        match writer.await {
            Ok(Ok(())) => {}
            // The program may legitimately stop reading early; its exit status decides.
            Ok(Err(e)) => warn!("Remover command closed stdin early: {}", e),
            Err(e) => return Err(RemovalError::Worker(e.to_string())),
        }

        if !output.status.success() {
            return Err(RemovalError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if output.stdout.is_empty() {
            return Err(RemovalError::EmptyOutput);
        }

        debug!("Remover command produced {} bytes", output.stdout.len());
        Ok(output.stdout)
    }
}
