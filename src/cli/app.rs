// ABOUTME: Main application orchestration for the autoscript CLI
// ABOUTME: Coordinates between CLI arguments, configuration, logging and command execution

use anyhow::Result;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use super::commands;
use super::{Args, Commands, Config};
use crate::output::{OutputConfig, OutputDestination, OutputFormat, OutputHandler};

pub struct App {
    config: Config,
}

impl App {
    /// Create a new application instance
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self, verbose: bool, no_color: bool) -> Result<()> {
        let log_level = if verbose {
            "debug"
        } else {
            &self.config.logging.level
        };

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        // Logs go to stderr so stdout stays parseable for snapshots
        let result = match self.config.logging.format.as_str() {
            "compact" => tracing_subscriber::fmt()
                .compact()
                .with_env_filter(env_filter)
                .with_ansi(!no_color)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init(),
            _ => tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(!no_color)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init(),
        };
        result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

        debug!("Logging initialized with level: {}", log_level);
        Ok(())
    }

    /// Output settings from the config file, overridden by --output/--format
    pub fn output_config(&self, args: &Args) -> Result<OutputConfig> {
        let mut output = self.config.output.clone();
        if let Some(ref format) = args.format {
            output.format = format.parse::<OutputFormat>()?;
        }
        if let Some(ref path) = args.output {
            output.destination = OutputDestination::file(path);
        }
        Ok(output)
    }

    /// Run the application with parsed arguments
    pub async fn run(&mut self, args: Args) -> Result<()> {
        self.init_logging(args.verbose, args.no_color)?;

        info!("Starting autoscript v{}", crate::VERSION);
        debug!("Configuration loaded from: {:?}", args.config);

        let output = OutputHandler::new(self.output_config(&args)?);

        match args.command {
            Commands::Run {
                script,
                vars,
                group,
            } => {
                let variables = Args::parse_variables(&vars)?;
                commands::run_script(script, variables, group, &self.config, &output).await
            }

            Commands::Validate { path, library } => {
                commands::validate(path, library, &self.config).await
            }

            Commands::Serve { library, duration } => {
                commands::serve(library, duration, &self.config, &output).await
            }

            Commands::Init {
                name,
                output_dir,
                template,
            } => commands::init_script(name, output_dir, template).await,

            Commands::Capabilities => commands::list_capabilities(&output).await,
        }
    }

    /// Create application from parsed arguments
    pub fn from_args(args: &Args) -> Result<Self> {
        let config = Config::load(args.config.clone())?;
        Ok(Self::new(config))
    }
}
