//! Update policy: delays, timeouts and the payload chunk size.
//!
//! The defaults are the reference policy the module firmware is known to
//! work with. Tests shrink them; the CLI lets users override them from a
//! config file.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::at::PAYLOAD_SIZE;

/// Delays and deadlines used by every protocol step.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timings {
    /// Wait after opening the port before the first command.
    pub settle_delay: Duration,
    /// Per-attempt handshake deadline.
    pub handshake_timeout: Duration,
    /// Firmware version query deadline.
    pub version_timeout: Duration,
    /// File list query deadline.
    pub list_files_timeout: Duration,
    /// Deadline for the download prompt after announcing the file.
    pub announce_timeout: Duration,
    /// Pause after the last chunk before waiting for the upload ack.
    pub upload_settle_delay: Duration,
    /// Deadline for the upload ack.
    pub upload_ack_timeout: Duration,
    /// Deadline for the install acknowledgment.
    pub install_timeout: Duration,
    /// Unconditional wait after install before polling.
    pub reboot_delay: Duration,
    /// Overall post-install polling window.
    pub recovery_window: Duration,
    /// Pause between post-install handshake attempts.
    pub recovery_poll_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            handshake_timeout: Duration::from_millis(1000),
            version_timeout: Duration::from_millis(1000),
            list_files_timeout: Duration::from_millis(1000),
            announce_timeout: Duration::from_millis(20_000),
            upload_settle_delay: Duration::from_secs(1),
            upload_ack_timeout: Duration::from_millis(1000),
            install_timeout: Duration::from_millis(60_000),
            reboot_delay: Duration::from_secs(10),
            recovery_window: Duration::from_secs(20 * 60),
            recovery_poll_interval: Duration::from_secs(1),
        }
    }
}

impl Timings {
    /// Number of post-install handshake attempts the policy allows.
    ///
    /// Always at least one.
    #[allow(clippy::cast_possible_truncation)]
    pub fn recovery_attempts(&self) -> u32 {
        let interval = self.recovery_poll_interval.as_nanos().max(1);
        let attempts = self.recovery_window.as_nanos() / interval;
        attempts.clamp(1, u128::from(u32::MAX)) as u32
    }

    /// Check that the policy can drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.recovery_poll_interval.is_zero() {
            return Err(Error::Config(
                "recovery poll interval must be greater than zero".into(),
            ));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::Config(
                "handshake timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of one update run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UpdateConfig {
    /// Delays and deadlines.
    pub timings: Timings,
    /// Bytes per upload write.
    pub payload_size: usize,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            timings: Timings::default(),
            payload_size: PAYLOAD_SIZE,
        }
    }
}

impl UpdateConfig {
    /// Replace the timings.
    #[must_use]
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Replace the payload chunk size.
    #[must_use]
    pub fn with_payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }

    /// Check that the configuration can drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.payload_size == 0 {
            return Err(Error::Config("payload size must be positive".into()));
        }
        self.timings.validate()
    }
}
