//! Error types for saraflash.

use std::io;

use thiserror::Error;

use crate::transfer::TransferStep;

/// Result type for saraflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for saraflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The serial port could not be opened.
    #[error("Cannot open port {port}: {source}")]
    Connect {
        /// Port name/path that was requested.
        port: String,
        /// Underlying open failure.
        source: Box<Error>,
    },

    /// An expected response did not arrive before its deadline.
    #[error(
        "Timeout waiting for {:?} after {}: received {:?}",
        .expected,
        display_command(.command),
        .received
    )]
    ProtocolTimeout {
        /// Command that was sent (empty when only waiting).
        command: String,
        /// Substring that was expected in the response.
        expected: String,
        /// Everything received before the deadline.
        received: String,
    },

    /// Firmware version query failed.
    #[error("Firmware version query failed: {0}")]
    VersionQuery(#[source] Box<Error>),

    /// One step of the file transfer failed.
    #[error("Transfer failed at step '{step}': {source}")]
    Transfer {
        /// Step that failed.
        step: TransferStep,
        /// Underlying failure.
        source: Box<Error>,
    },

    /// Module did not answer the handshake after installing the firmware.
    #[error("Module did not recover after {attempts} handshake attempts: {source}")]
    RecoveryTimeout {
        /// Number of handshake attempts made.
        attempts: u32,
        /// Error of the last handshake attempt.
        source: Box<Error>,
    },

    /// Firmware image cannot be used.
    #[error("Invalid firmware image: {0}")]
    InvalidImage(String),

    /// Session was already closed.
    #[error("Session is closed")]
    SessionClosed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error (or the error it wraps) is a protocol timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ProtocolTimeout { .. } => true,
            Self::VersionQuery(source)
            | Self::Transfer { source, .. }
            | Self::RecoveryTimeout { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

fn display_command(command: &str) -> String {
    if command.is_empty() {
        "waiting".to_string()
    } else {
        format!("{command:?}")
    }
}
