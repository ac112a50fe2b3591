//! Post-install recovery polling.
//!
//! After `AT+UFWINSTALL` is acknowledged the module reboots into the new
//! firmware, which can take a long time. The watchdog waits a fixed delay,
//! then repeats the handshake until it succeeds or the attempt budget
//! derived from the recovery window runs out. Attempts start one poll
//! interval apart, so a silent module is given up on once the window has
//! passed.

use log::{debug, error, info};

use crate::clock::Clock;
use crate::config::Timings;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::session::Session;

/// Wait until the module answers the handshake again.
///
/// Returns the number of handshake attempts it took. When the budget is
/// exhausted the last handshake error is returned inside
/// [`Error::RecoveryTimeout`].
pub fn wait_for_recovery<P, C>(session: &mut Session<P, C>, timings: &Timings) -> Result<u32>
where
    P: Port,
    C: Clock,
{
    let max_attempts = timings.recovery_attempts();

    info!(
        "Waiting {}s for the module to reboot",
        timings.reboot_delay.as_secs()
    );
    session.sleep(timings.reboot_delay);

    info!(
        "Polling module for up to {} minutes",
        timings.recovery_window.as_secs() / 60
    );
    let mut attempt = 0;
    loop {
        attempt += 1;
        let started = session.clock().now();
        match session.hello(timings.handshake_timeout) {
            Ok(()) => {
                info!("Module answered after {attempt} attempt(s)");
                return Ok(attempt);
            },
            Err(e) if attempt >= max_attempts => {
                error!("Module did not come back after {attempt} attempts: {e}");
                return Err(Error::RecoveryTimeout {
                    attempts: attempt,
                    source: Box::new(e),
                });
            },
            Err(e) => {
                debug!("Handshake attempt {attempt}/{max_attempts} failed: {e}");
                // Attempts start one poll interval apart.
                let spent = session.clock().now().saturating_duration_since(started);
                let pause = timings.recovery_poll_interval.saturating_sub(spent);
                if !pause.is_zero() {
                    session.sleep(pause);
                }
            },
        }
    }
}
