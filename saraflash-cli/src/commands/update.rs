//! Update and version command implementations.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use saraflash::port::DEFAULT_BAUD;
use saraflash::{FirmwareImage, FlowControl, Timings, UpdateConfig, UpdateReport, Updater};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::programmer::ExternalProgrammer;
use crate::{Cli, CliError, use_fancy_output};

/// Serial settings resolved from flags, environment and config files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Connection {
    pub port: String,
    pub baud: u32,
    pub flow_control: FlowControl,
}

/// Resolve the serial settings; command-line values win over the config file.
pub(crate) fn resolve_connection(cli: &Cli, config: &Config) -> Result<Connection, CliError> {
    let port = cli
        .port
        .clone()
        .or_else(|| config.connection.port.clone())
        .ok_or(CliError::NoPort)?;
    let baud = cli.baud.or(config.connection.baud).unwrap_or(DEFAULT_BAUD);
    let flow_control = match config.connection.flow_control.as_deref() {
        None => FlowControl::None,
        Some(name) => FlowControl::from_name(name)
            .ok_or_else(|| CliError::Config(format!("unknown flow control {name:?}")))?,
    };

    Ok(Connection {
        port,
        baud,
        flow_control,
    })
}

/// Update command implementation.
pub(crate) fn cmd_update(
    cli: &Cli,
    config: &Config,
    firmware: &Path,
    uploader: Option<&Path>,
    restore: Option<&Path>,
    recovery_window: Option<u64>,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware {}",
            style("📦").cyan(),
            firmware.display()
        );
    }

    let image = FirmwareImage::from_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;

    if !cli.quiet {
        eprintln!("  {} bytes", image.len());
    }

    let mut timings = config.timings();
    if let Some(minutes) = recovery_window {
        timings.recovery_window = Duration::from_secs(minutes.saturating_mul(60));
    }

    let report = run_session(cli, config, timings, Some(&image), uploader, restore)?;

    if !cli.quiet {
        eprintln!(
            "\n{} Firmware updated: {} -> {}",
            style("🎉").green().bold(),
            report.initial_version,
            report.final_version
        );
    }
    println!("{}", report.final_version);

    Ok(())
}

/// Version command implementation.
pub(crate) fn cmd_version(
    cli: &Cli,
    config: &Config,
    uploader: Option<&Path>,
    restore: Option<&Path>,
) -> Result<()> {
    let report = run_session(cli, config, config.timings(), None, uploader, restore)?;
    println!("{}", report.final_version);
    Ok(())
}

/// Install the uploader, talk to the module, then restore the previous sketch.
fn run_session(
    cli: &Cli,
    config: &Config,
    timings: Timings,
    image: Option<&FirmwareImage>,
    uploader: Option<&Path>,
    restore: Option<&Path>,
) -> Result<UpdateReport> {
    let connection = resolve_connection(cli, config)?;
    let update_config = UpdateConfig::default().with_timings(timings);
    // The host sketch must not be replaced for a run that cannot start.
    update_config.validate()?;
    let programmer = ExternalProgrammer::from_config(&config.programmer);

    if let Some(binary) = uploader {
        if !cli.quiet {
            eprintln!(
                "{} Installing uploader application with {}",
                style("🔧").cyan(),
                programmer.program()
            );
        }
        programmer
            .flash(&connection.port, binary)
            .context("Failed to install the uploader application")?;
    }

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            connection.port,
            connection.baud
        );
    }

    let updater = Updater::new(update_config);

    let mut bar: Option<ProgressBar> = None;
    let result = updater.run_native(
        &connection.port,
        connection.baud,
        connection.flow_control,
        image,
        |state| {
            let pb = bar.get_or_insert_with(|| new_progress_bar(cli.quiet));
            pb.set_position(u64::from(state.percent()));
            if state.offset() == state.total() {
                pb.finish_with_message("uploaded");
            }
        },
    );
    if let Some(pb) = bar.filter(|pb| !pb.is_finished()) {
        pb.abandon();
    }
    let report = result?;

    if !cli.quiet {
        eprintln!(
            "{} Module firmware: {}",
            style("✓").green(),
            report.final_version
        );
    }

    if let Some(binary) = restore {
        if !cli.quiet {
            eprintln!(
                "{} Restoring previous sketch with {}",
                style("🔧").cyan(),
                programmer.program()
            );
        }
        programmer
            .flash(&connection.port, binary)
            .context("Failed to restore the previous sketch")?;
    }

    Ok(report)
}

fn new_progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.set_message("uploading");
    pb
}
