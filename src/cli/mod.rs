mod config;
mod extract;
mod worker;

use std::sync::Arc;

use crate::{
    bridge::Bridge,
    config::HostConfig,
    handlers::{Handlers, HostEvents},
    local_logger::{HOST_U8_COLOR_CODE, init_local_logger},
    prelude::*,
    telemetry::{
        Metadata, OperationCategory, OperationResult, OperationTracker, build_error_reporter,
    },
};
use clap::{
    Parser, Subcommand,
    builder::{Styles, styling},
};

fn create_styles() -> Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::Ansi256Color(HOST_U8_COLOR_CODE).on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Host process of the archive migration wizard",
    styles = create_styles()
)]
pub struct Cli {
    /// The configuration name to use
    /// If provided, the configuration will be loaded from ~/.config/migration-host/{config-name}.yaml
    /// Otherwise, loads from ~/.config/migration-host/config.yaml
    #[arg(long, env = "MIGRATION_HOST_CONFIG_NAME", global = true)]
    pub config_name: Option<String>,

    /// Endpoint receiving failure reports, overrides the configured one
    #[arg(long, env = "MIGRATION_HOST_ERROR_REPORT_URL", global = true, hide = true)]
    pub error_report_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract an archive and print the folder holding its data
    #[command(alias = "x")]
    Extract(extract::ExtractArgs),
    /// Run the migration worker in the foreground, mirroring its output and exit status
    #[command(alias = "r")]
    Run(worker::RunArgs),
    /// Serve the line-delimited JSON bridge on stdin/stdout
    Bridge,
    /// Inspect or initialize the host configuration
    Config(config::ConfigArgs),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Extract(_) => "extract",
            Commands::Run(_) => "run",
            Commands::Bridge => "bridge",
            Commands::Config(_) => "config",
        }
    }
}

/// Everything a command needs, built once at startup.
pub(crate) struct Host {
    pub config: HostConfig,
    pub tracker: Arc<OperationTracker>,
    pub handlers: Handlers,
    pub events: HostEvents,
}

impl Host {
    fn build(config: HostConfig) -> Result<Self> {
        let reporter = build_error_reporter(&config.telemetry);
        let tracker = Arc::new(OperationTracker::new(reporter.clone()));
        let startup = tracker.start_operation(
            "startup",
            OperationCategory::Startup,
            Metadata::new(),
        );

        match Handlers::build(&config, tracker.clone(), reporter) {
            Ok((handlers, events)) => {
                tracker.end_operation(&startup, OperationResult::success());
                Ok(Self {
                    config,
                    tracker,
                    handlers,
                    events,
                })
            }
            Err(e) => {
                tracker.end_operation(&startup, OperationResult::failure(&e));
                Err(e)
            }
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_local_logger()?;

    let mut config = HostConfig::load(cli.config_name.as_deref())?;
    if let Some(url) = cli.error_report_url {
        config.telemetry.error_report_url = Some(url);
    }
    debug!("Running the {} command", cli.command.name());

    match cli.command {
        Commands::Extract(args) => extract::run(args, Host::build(config)?).await?,
        Commands::Run(args) => worker::run(args, Host::build(config)?).await?,
        Commands::Bridge => serve_bridge(Host::build(config)?).await?,
        Commands::Config(args) => config::run(args, &config, cli.config_name.as_deref())?,
    }
    Ok(())
}

async fn serve_bridge(host: Host) -> Result<()> {
    let retention = host.config.telemetry.retention();
    let bridge = Bridge::new(Arc::new(host.handlers), host.tracker, retention);
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    bridge.serve(input, tokio::io::stdout(), host.events).await
}
