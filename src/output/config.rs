// ABOUTME: Configuration types for snapshot output
// ABOUTME: Output format selection and destination (stdout or file) settings

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::error::OutputError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    #[default]
    Pretty,
    Yaml,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Pretty => "pretty",
            OutputFormat::Yaml => "yaml",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "pretty" => Ok(OutputFormat::Pretty),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            other => Err(OutputError::FormatterNotFound {
                format: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputDestination {
    Stdout {
        #[serde(default)]
        quiet: bool,
    },
    File {
        path: PathBuf,
        #[serde(default = "default_true")]
        create_dirs: bool,
        #[serde(default)]
        append: bool,
    },
}

impl OutputDestination {
    pub fn stdout() -> Self {
        OutputDestination::Stdout { quiet: false }
    }

    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        OutputDestination::File {
            path: path.into(),
            create_dirs: true,
            append: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_destination")]
    pub destination: OutputDestination,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            destination: default_destination(),
        }
    }
}

impl OutputConfig {
    pub fn new(format: OutputFormat, destination: OutputDestination) -> Self {
        Self {
            format,
            destination,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_destination() -> OutputDestination {
    OutputDestination::stdout()
}
