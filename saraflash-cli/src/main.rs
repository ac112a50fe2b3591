//! saraflash CLI - Command-line tool for updating u-blox SARA module firmware.
//!
//! ## Features
//!
//! - Upload and install firmware over the module's AT interface
//! - Query the running firmware version
//! - Install and restore the host board's passthrough sketch
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod programmer;

use commands::completions::cmd_completions;
use commands::update::{cmd_update, cmd_version};
use config::Config;

/// Exit code for configuration and usage problems found after parsing.
const EXIT_CONFIG: u8 = 3;
/// Exit code when the serial port cannot be opened.
const EXIT_CONNECT: u8 = 4;
/// Exit code when the module never answers after installing.
const EXIT_RECOVERY: u8 = 5;

/// Errors raised by the command-line layer itself.
#[derive(Error, Debug)]
pub(crate) enum CliError {
    #[error(
        "No serial port given; use --port, SARAFLASH_PORT or `port` in the [connection] config section"
    )]
    NoPort,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// saraflash - Firmware updater for u-blox SARA cellular modules.
///
/// Environment variables:
///   SARAFLASH_PORT              - Default serial port
///   SARAFLASH_BAUD              - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "saraflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port the module is reachable on.
    #[arg(short, long, global = true, env = "SARAFLASH_PORT")]
    port: Option<String>,

    /// Baud rate (default: 115200).
    #[arg(short, long, global = true, env = "SARAFLASH_BAUD")]
    baud: Option<u32>,

    /// Increase verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the global and local ones.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload and install a firmware image.
    Update {
        /// Firmware image to install.
        firmware: PathBuf,

        /// Passthrough sketch to write to the host board first.
        #[arg(long, value_name = "BIN")]
        uploader: Option<PathBuf>,

        /// Sketch to write back to the host board afterwards.
        #[arg(long, value_name = "BIN")]
        restore: Option<PathBuf>,

        /// How long to wait for the module after installing.
        #[arg(long, value_name = "MINUTES")]
        recovery_window: Option<u64>,
    },

    /// Print the firmware version the module reports.
    Version {
        /// Passthrough sketch to write to the host board first.
        #[arg(long, value_name = "BIN")]
        uploader: Option<PathBuf>,

        /// Sketch to write back to the host board afterwards.
        #[arg(long, value_name = "BIN")]
        restore: Option<PathBuf>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "saraflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Update {
            firmware,
            uploader,
            restore,
            recovery_window,
        } => cmd_update(
            cli,
            &config,
            firmware,
            uploader.as_deref(),
            restore.as_deref(),
            *recovery_window,
        ),
        Commands::Version { uploader, restore } => {
            cmd_version(cli, &config, uploader.as_deref(), restore.as_deref())
        },
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Map a failure to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<CliError>().is_some() {
        return EXIT_CONFIG;
    }
    match err.downcast_ref::<saraflash::Error>() {
        Some(saraflash::Error::Config(_)) => EXIT_CONFIG,
        Some(saraflash::Error::Connect { .. }) => EXIT_CONNECT,
        Some(saraflash::Error::RecoveryTimeout { .. }) => EXIT_RECOVERY,
        _ => 1,
    }
}
