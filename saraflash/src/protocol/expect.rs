//! Send-and-wait primitive behind every AT exchange.
//!
//! Each protocol step is one [`Expectation`]: an optional command line, a
//! substring that marks success and a deadline.

use std::io::ErrorKind;
use std::time::Duration;

use log::trace;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::at;

/// Size of the scratch buffer for each read.
const READ_CHUNK: usize = 256;

/// One command/response contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation<'a> {
    /// Command to send. Empty means only wait.
    pub command: &'a str,
    /// Substring that must appear in the response.
    pub expected: &'a str,
    /// Deadline for the substring to appear.
    pub timeout: Duration,
}

impl<'a> Expectation<'a> {
    /// Send `command` and wait for `expected`.
    pub fn new(command: &'a str, expected: &'a str, timeout: Duration) -> Self {
        Self {
            command,
            expected,
            timeout,
        }
    }

    /// Wait for `expected` without sending anything.
    pub fn wait_for(expected: &'a str, timeout: Duration) -> Self {
        Self::new("", expected, timeout)
    }
}

/// Send the expectation's command and read until its substring shows up.
///
/// Returns the text accumulated up to and including the read that matched.
/// Read timeouts from the port only re-check the deadline; any other I/O
/// error ends the exchange.
pub fn expect<P, C>(port: &mut P, clock: &C, expectation: &Expectation<'_>) -> Result<String>
where
    P: Port + ?Sized,
    C: Clock + ?Sized,
{
    if !expectation.command.is_empty() {
        trace!("> {}", expectation.command);
        port.write_all_bytes(at::command_line(expectation.command).as_bytes())?;
    }

    let deadline = clock.now() + expectation.timeout;
    let mut received = Vec::new();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        match port.read(&mut buf) {
            Ok(0) => {},
            Ok(n) => {
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received);
                if text.contains(expectation.expected) {
                    trace!("< {}", text.trim_end());
                    return Ok(text.into_owned());
                }
            },
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {},
            Err(e) => return Err(Error::Io(e)),
        }

        if clock.now() >= deadline {
            let received = String::from_utf8_lossy(&received).into_owned();
            trace!(
                "Timed out waiting for {:?}, got {:?}",
                expectation.expected, received
            );
            return Err(Error::ProtocolTimeout {
                command: expectation.command.to_string(),
                expected: expectation.expected.to_string(),
                received,
            });
        }
    }
}
