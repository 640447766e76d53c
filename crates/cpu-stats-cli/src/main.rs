//! CLI for cpu-stats: long-running CPU frequency and package power histograms.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cpu_stats_core::config::{
    DEFAULT_INTERVAL_SECS, DEFAULT_NAMESPACE, DEFAULT_PID_FILE, INTERVAL_RANGE,
};
use cpu_stats_core::{DaemonConfig, StatsConfig};

#[derive(Parser, Debug)]
#[command(name = "cpu-stats")]
#[command(about = "cpu-stats: where your CPUs spend their time, in MHz and watts")]
#[command(version = cpu_stats_core::VERSION)]
struct Cli {
    /// Shared memory namespace (prefix of every segment name)
    #[arg(long, global = true, hide = true, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Root of the sysfs tree to sample
    #[arg(long, global = true, hide = true, default_value = "/sys")]
    sysfs_root: PathBuf,

    /// Defaults to `report` when omitted.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Run the sampling daemon, the single writer of all histograms
    Daemon {
        /// Stay attached to the terminal instead of detaching
        #[arg(short, long)]
        foreground: bool,

        /// Sampling interval in seconds
        #[arg(
            short = 't',
            long = "interval",
            default_value_t = DEFAULT_INTERVAL_SECS,
            value_parser = clap::value_parser!(u32)
                .range(i64::from(*INTERVAL_RANGE.start())..=i64::from(*INTERVAL_RANGE.end()))
        )]
        interval: u32,

        /// PID file written and locked when running as root
        #[arg(long, default_value = DEFAULT_PID_FILE)]
        pid_file: PathBuf,

        /// Append log output to this file (stderr is closed once detached)
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Print the histograms collected by a running daemon
    Report {
        /// Summary lines only, no tables
        #[arg(short, long)]
        short: bool,

        /// Machine-readable JSON instead of text
        #[arg(long)]
        json: bool,

        /// Comma-separated metrics: rapl, freq, gpu (default: all)
        #[arg(long)]
        metrics: Option<String>,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Report {
            short: false,
            json: false,
            metrics: None,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let stats = StatsConfig {
        namespace: cli.namespace,
        sysfs_root: cli.sysfs_root,
    };

    let code = match cli.command.unwrap_or_default() {
        Commands::Daemon {
            foreground,
            interval,
            pid_file,
            log_file,
        } => {
            if let Err(e) = commands::init_logging("info", log_file.as_deref()) {
                eprintln!("Error opening log file: {e}");
                std::process::exit(1);
            }
            commands::daemon::run(&DaemonConfig {
                interval_secs: interval,
                foreground,
                pid_file,
                stats,
            })
        }
        Commands::Report {
            short,
            json,
            metrics,
        } => {
            let _ = commands::init_logging("warn", None);
            commands::report::run(&stats, metrics.as_deref(), short, json)
        }
    };
    std::process::exit(code);
}
