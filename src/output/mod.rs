// ABOUTME: Output module for task, queue and execution snapshots
// ABOUTME: Formats snapshots as JSON/pretty JSON/YAML and writes them to stdout or files

pub mod config;
pub mod error;
pub mod formatter;
pub mod writer;

use serde::Serialize;

pub use self::config::{OutputConfig, OutputDestination, OutputFormat};
pub use self::error::{OutputError, Result};
pub use self::formatter::{render, summarize_report, OutputFormatter};
use self::writer::{DestinationWriter, OutputWriter};

pub struct OutputHandler {
    config: OutputConfig,
    writer: Box<dyn OutputWriter>,
}

impl OutputHandler {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            config,
            writer: Box::new(DestinationWriter::new()),
        }
    }

    pub fn with_writer(mut self, writer: Box<dyn OutputWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Format and write a snapshot to the configured destination
    pub async fn emit<T: Serialize + Sync + ?Sized>(&self, value: &T) -> Result<()> {
        let rendered = render(value, self.config.format)?;
        self.writer.write(&rendered, &self.config.destination).await
    }
}

impl Default for OutputHandler {
    fn default() -> Self {
        Self::new(OutputConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_emit_to_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("status.yaml");
        let handler = OutputHandler::new(OutputConfig::new(
            OutputFormat::Yaml,
            OutputDestination::file(&path),
        ));

        handler.emit(&json!({ "enabled": true })).await.unwrap();
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "enabled: true");
    }
}
