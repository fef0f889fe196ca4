mod cli_logger;

use clap::{Parser, Subcommand};
use profmerge::{DEFAULT_CONFIG_FILE, ProfileConfig, ReportArgs, inspect_command, report_command};
use tracing_subscriber::EnvFilter;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cli_logger::CliLogger;

const LOG_ENV: &str = "PROFMERGE_LOG";

/// Merge, filter and render per-worker call-graph snapshots.
#[derive(Debug, Parser)]
#[command(name = "profmerge", version, about)]
struct Cli {
    /// Machine-readable JSON output
    #[arg(long, global = true)]
    json: bool,
    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,
    /// Config file (defaults to ./profmerge.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Verbosity (-v, -vv, -vvv); PROFMERGE_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Aggregate a scratch directory left behind by a run
    Report(ReportArgs),
    /// Show one snapshot's metadata and totals
    Inspect {
        #[arg(value_name = "SNAPSHOT")]
        snapshot: PathBuf,
    },
    /// Print the effective configuration after environment overrides
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let logger = CliLogger::new(cli.json, cli.no_color);

    match run(&cli, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.print_error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, logger: &CliLogger) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match &cli.command {
        Command::Report(args) => logger.print_report(&report_command(&config, args)?),
        Command::Inspect { snapshot } => logger.print_inspection(&inspect_command(snapshot)?),
        Command::Config => logger.print_serialized(&config),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ProfileConfig> {
    let mut config = match path {
        Some(path) => ProfileConfig::load(path)?,
        None => ProfileConfig::load_optional(Path::new(DEFAULT_CONFIG_FILE)),
    };
    config.apply_env()?;
    Ok(config)
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("profmerge=warn"),
        1 => EnvFilter::new("profmerge=info"),
        2 => EnvFilter::new("profmerge=debug"),
        _ => EnvFilter::new("profmerge=trace"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
