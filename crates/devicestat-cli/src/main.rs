//! CLI for devicestat: serve device telemetry over HTTP or print one-shot
//! snapshots.

mod commands;

use std::path::PathBuf;

use clap::builder::PossibleValuesParser;
use clap::{Args, Parser, Subcommand};

use devicestat_core::SECTION_NAMES;
use devicestat_server::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_WORKERS, MIN_PORT};

#[derive(Parser)]
#[command(name = "devicestat")]
#[command(about = "devicestat: CPU, GPU, memory, battery and foreground-app telemetry")]
#[command(version = devicestat_core::VERSION)]
struct Cli {
    /// Log at debug level (RUST_LOG still applies when not set)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the device's kernel interfaces live.
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Root of the procfs mount
    #[arg(long, default_value = "/proc")]
    proc_root: PathBuf,

    /// Root of the sysfs mount
    #[arg(long, default_value = "/sys")]
    sys_root: PathBuf,

    /// Path whose filesystem capacity is reported (default: /data, else /)
    #[arg(long)]
    storage_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve telemetry over HTTP until interrupted
    Serve {
        /// Address to bind
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Port to listen on
        #[arg(long, default_value_t = DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(MIN_PORT as i64..))]
        port: u16,

        /// Connections handled concurrently
        #[arg(long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        /// Per-connection deadline in seconds
        #[arg(long, default_value = "10")]
        timeout_secs: u64,

        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Print one section as JSON and exit
    Snapshot {
        /// Section to sample
        #[arg(value_parser = PossibleValuesParser::new(SECTION_NAMES.iter().copied()))]
        section: String,

        /// Delay between the priming and the reported CPU sample, in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,

        /// Single-line JSON instead of pretty-printed
        #[arg(long)]
        compact: bool,

        #[command(flatten)]
        device: DeviceArgs,
    },

    /// List the HTTP routes
    Routes,
}

fn main() {
    let cli = Cli::parse();
    commands::init_logger(cli.verbose);

    match cli.command {
        Commands::Serve {
            host,
            port,
            workers,
            timeout_secs,
            device,
        } => commands::serve::run(commands::serve::ServeCommandConfig {
            host,
            port,
            workers,
            timeout_secs,
            device: &device,
        }),
        Commands::Snapshot {
            section,
            interval_ms,
            compact,
            device,
        } => commands::snapshot::run(&section, interval_ms, compact, &device),
        Commands::Routes => commands::routes::run(),
    }
}
