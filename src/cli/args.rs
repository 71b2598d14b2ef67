// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and subcommands for autoscript

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "autoscript")]
#[command(about = "Run automation scripts through per-group priority queues with a liveness watchdog")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,

    #[arg(short, long, global = true, help = "Write reports and snapshots to this file")]
    pub output: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Snapshot format: json, pretty or yaml")]
    pub format: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a script once, outside any queue
    Run {
        #[arg(help = "Path to a script file (YAML or JSON)")]
        script: PathBuf,

        #[arg(
            short = 'V',
            long = "var",
            help = "Initial variable binding (name=value, value parsed as JSON when possible)"
        )]
        vars: Vec<String>,

        #[arg(short, long, help = "Group the execution is attributed to")]
        group: Option<String>,
    },

    /// Validate a script or library file without executing
    Validate {
        #[arg(help = "Path to the script or library file")]
        path: PathBuf,

        #[arg(long, help = "Treat the file as a library of groups and scripts")]
        library: bool,
    },

    /// Load a library and run its queues until interrupted
    Serve {
        #[arg(help = "Path to the library file")]
        library: PathBuf,

        #[arg(
            long,
            value_parser = parse_duration,
            help = "Stop after this long (e.g. 30s, 5m); runs until Ctrl-C otherwise"
        )]
        duration: Option<Duration>,
    },

    /// Initialize a new script file from template
    Init {
        #[arg(help = "Id of the script to create")]
        name: String,

        #[arg(short = 'd', long, help = "Output directory", default_value = ".")]
        output_dir: PathBuf,

        #[arg(long, help = "Script template: basic, exception or startup", default_value = "basic")]
        template: String,
    },

    /// List registered capabilities and their actions
    Capabilities,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse `name=value` bindings. Values that parse as JSON keep their
    /// type (`count=3`, `flag=true`); anything else is a string.
    pub fn parse_variables(vars: &[String]) -> anyhow::Result<Map<String, Value>> {
        let mut variables = Map::new();

        for var in vars {
            if let Some((key, value)) = var.split_once('=') {
                let parsed = serde_json::from_str(value)
                    .unwrap_or_else(|_| Value::String(value.to_string()));
                variables.insert(key.to_string(), parsed);
            } else {
                return Err(anyhow::anyhow!(
                    "Invalid variable format '{}'. Expected 'name=value'",
                    var
                ));
            }
        }

        Ok(variables)
    }
}
