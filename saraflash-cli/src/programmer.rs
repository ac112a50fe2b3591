//! Companion programmer for the host board.
//!
//! The module can only be reached once the host board runs a serial
//! passthrough sketch. That sketch and the one it replaces are written by an
//! external tool (`bossac` by default) run as a child process.

use std::path::Path;
use std::process::Command;

use log::{debug, info};
use thiserror::Error;

use crate::config::ProgrammerConfig;

/// Default programmer executable.
pub const DEFAULT_PROGRAM: &str = "bossac";

/// Default argument template.
pub const DEFAULT_ARGS: &[&str] = &[
    "-d",
    "--port={port}",
    "-U",
    "-i",
    "-e",
    "-w",
    "{binary}",
    "-R",
];

/// Errors raised while running the programmer.
#[derive(Error, Debug)]
pub enum ProgrammerError {
    #[error("Binary not found: {0}")]
    MissingBinary(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },
}

/// Runs the configured programmer against the host board.
#[derive(Debug, Clone)]
pub struct ExternalProgrammer {
    program: String,
    args: Vec<String>,
}

impl Default for ExternalProgrammer {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: DEFAULT_ARGS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl ExternalProgrammer {
    /// Build from the `[programmer]` config section, falling back to defaults.
    pub fn from_config(config: &ProgrammerConfig) -> Self {
        let defaults = Self::default();
        Self {
            program: config.program.clone().unwrap_or(defaults.program),
            args: config.args.clone().unwrap_or(defaults.args),
        }
    }

    /// Executable name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with `{port}` and `{binary}` substituted.
    pub fn expand_args(&self, port: &str, binary: &Path) -> Vec<String> {
        let binary = binary.display().to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{port}", port).replace("{binary}", &binary))
            .collect()
    }

    /// Write `binary` to the board attached to `port` and wait for the tool to exit.
    pub fn flash(&self, port: &str, binary: &Path) -> Result<(), ProgrammerError> {
        if !binary.is_file() {
            return Err(ProgrammerError::MissingBinary(binary.display().to_string()));
        }

        let args = self.expand_args(port, binary);
        info!("Running {} for {}", self.program, binary.display());
        debug!("{} {}", self.program, args.join(" "));

        let status = Command::new(&self.program)
            .args(&args)
            .status()
            .map_err(|source| ProgrammerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ProgrammerError::Failed {
                program: self.program.clone(),
                status: status.to_string(),
            })
        }
    }
}
