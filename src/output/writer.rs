// ABOUTME: Output writers for snapshot destinations (stdout, files)
// ABOUTME: Writes already formatted content, creating parent directories on request

use async_trait::async_trait;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::config::OutputDestination;
use super::error::{OutputError, Result};

#[async_trait]
pub trait OutputWriter: Send + Sync {
    async fn write(&self, content: &str, destination: &OutputDestination) -> Result<()>;
}

/// Writes to whichever destination it is given
#[derive(Default)]
pub struct DestinationWriter;

impl DestinationWriter {
    pub fn new() -> Self {
        Self
    }

    async fn write_file(
        &self,
        content: &str,
        path: &Path,
        create_dirs: bool,
        append: bool,
    ) -> Result<()> {
        if create_dirs {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| OutputError::WriteError {
                        message: format!("Failed to create directory {}: {}", parent.display(), e),
                    })?;
            }
        }

        if append {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|e| OutputError::WriteError {
                    message: format!("Failed to open file for append {}: {}", path.display(), e),
                })?;
            file.write_all(content.as_bytes()).await?;
            file.write_all(b"\n").await?;
        } else {
            fs::write(path, content)
                .await
                .map_err(|e| OutputError::WriteError {
                    message: format!("Failed to write file {}: {}", path.display(), e),
                })?;
        }

        info!(
            "Output written to file: {} ({} bytes)",
            path.display(),
            content.len()
        );
        Ok(())
    }
}

#[async_trait]
impl OutputWriter for DestinationWriter {
    async fn write(&self, content: &str, destination: &OutputDestination) -> Result<()> {
        match destination {
            OutputDestination::Stdout { quiet } => {
                if !quiet {
                    println!("{}", content);
                }
                debug!("Output written to stdout ({} chars)", content.len());
                Ok(())
            }
            OutputDestination::File {
                path,
                create_dirs,
                append,
            } => self.write_file(content, path, *create_dirs, *append).await,
        }
    }
}
