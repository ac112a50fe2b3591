//! Live connection to the module.
//!
//! A [`Session`] exclusively owns the port for the duration of one update
//! run. All module I/O goes through it, and the port is closed exactly once:
//! either by an explicit [`Session::close`] or when the session is dropped.

use std::time::Duration;

use log::{trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{Expectation, at, expect};

/// Connection to the module over a [`Port`].
pub struct Session<P: Port, C: Clock = SystemClock> {
    port: P,
    clock: C,
    payload_size: usize,
    closed: bool,
}

impl<P: Port, C: Clock> Session<P, C> {
    /// Wrap an opened port.
    ///
    /// `payload_size` is the number of bytes per upload write and must be
    /// positive.
    pub fn new(port: P, clock: C, payload_size: usize) -> Result<Self> {
        if payload_size == 0 {
            return Err(Error::Config("payload size must be positive".into()));
        }
        Ok(Self {
            port,
            clock,
            payload_size,
            closed: false,
        })
    }

    /// Bytes per upload write.
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Clock driving this session's delays and deadlines.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Block for `duration` on the session clock.
    pub fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration);
    }

    /// Whether the port has been released.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run one command/response exchange.
    pub fn expect(&mut self, expectation: &Expectation<'_>) -> Result<String> {
        self.ensure_open()?;
        expect(&mut self.port, &self.clock, expectation)
    }

    /// Handshake: `AT` must be answered with `OK`.
    pub fn hello(&mut self, timeout: Duration) -> Result<()> {
        self.expect(&Expectation::new(at::HANDSHAKE, at::OK, timeout))?;
        Ok(())
    }

    /// Query the firmware version string.
    pub fn firmware_version(&mut self, timeout: Duration) -> Result<String> {
        let response = self.expect(&Expectation::new(at::VERSION_QUERY, at::OK, timeout))?;
        Ok(at::information_text(at::VERSION_QUERY, &response))
    }

    /// Write one chunk of file data at `offset` while in download mode.
    pub fn write_chunk(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        trace!("Writing {} bytes at offset {offset}", data.len());
        self.port.write_all_bytes(data)
    }

    /// Discard input that arrived before the first command.
    pub fn discard_input(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.port.clear_buffers()
    }

    /// Release the port. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.port.close()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }
}

impl<P: Port, C: Clock> Drop for Session<P, C> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close {}: {e}", self.port.name());
        }
    }
}
