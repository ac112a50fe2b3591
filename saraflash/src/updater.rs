//! Top-level update workflow.
//!
//! ## States
//!
//! ```text
//! Disconnected -> Connected -> Synchronized -> VersionKnown
//!      ^                                          |
//!      |                          (image given)   v
//!      +---- VersionKnown(post) <-------------- Updating
//! ```
//!
//! Every step either succeeds or ends the run. The port is closed exactly
//! once on every exit path.

use std::fmt;

use log::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::UpdateConfig;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::session::Session;
use crate::transfer::{FirmwareImage, TransferState, transfer};
use crate::watchdog::wait_for_recovery;

/// Workflow state, used for logging transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No port open.
    Disconnected,
    /// Port open and settled.
    Connected,
    /// Handshake answered.
    Synchronized,
    /// Firmware version read.
    VersionKnown,
    /// Uploading, installing and waiting for recovery.
    Updating,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::Synchronized => write!(f, "synchronized"),
            Self::VersionKnown => write!(f, "version known"),
            Self::Updating => write!(f, "updating"),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// Version reported before any update.
    pub initial_version: String,
    /// Version reported at the end of the run.
    pub final_version: String,
    /// Whether an image was uploaded and installed.
    pub updated: bool,
    /// Handshake attempts the post-install watchdog needed.
    pub recovery_attempts: Option<u32>,
}

/// Drives one update run against a module.
pub struct Updater<C: Clock = SystemClock> {
    config: UpdateConfig,
    clock: C,
}

impl Updater<SystemClock> {
    /// Create an updater using the wall clock.
    pub fn new(config: UpdateConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock + Clone> Updater<C> {
    /// Create an updater with a custom clock.
    pub fn with_clock(config: UpdateConfig, clock: C) -> Self {
        Self { config, clock }
    }

    /// Configuration in use.
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Run the workflow on the port returned by `open`.
    ///
    /// Without an `image` the run only reads the firmware version.
    /// `progress` is called after every uploaded chunk.
    pub fn run<P, O, F>(
        &self,
        port_name: &str,
        open: O,
        image: Option<&FirmwareImage>,
        progress: F,
    ) -> Result<UpdateReport>
    where
        P: Port,
        O: FnOnce(&str) -> Result<P>,
        F: FnMut(&TransferState),
    {
        self.config.validate()?;
        let timings = &self.config.timings;

        info!("Connecting to {port_name}");
        let port = open(port_name).map_err(|e| Error::Connect {
            port: port_name.to_string(),
            source: Box::new(e),
        })?;
        let mut session = Session::new(port, self.clock.clone(), self.config.payload_size)?;

        let mut state = StateLog(State::Disconnected);
        debug!("Waiting {:?} for the module to settle", timings.settle_delay);
        session.sleep(timings.settle_delay);
        state.enter(State::Connected);

        let result = self.drive(&mut session, &mut state, image, progress);
        let closed = session.close();
        state.enter(State::Disconnected);

        match (result, closed) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("Failed to close {port_name}: {close_err}");
                }
                Err(e)
            },
        }
    }

    fn drive<P, F>(
        &self,
        session: &mut Session<P, C>,
        state: &mut StateLog,
        image: Option<&FirmwareImage>,
        progress: F,
    ) -> Result<UpdateReport>
    where
        P: Port,
        F: FnMut(&TransferState),
    {
        let timings = &self.config.timings;
        session.discard_input()?;

        info!("Synchronizing with module");
        session.hello(timings.handshake_timeout)?;
        state.enter(State::Synchronized);

        info!("Reading firmware version");
        let initial_version = read_version(session, timings.version_timeout)?;
        info!("Initial firmware version: {initial_version}");
        state.enter(State::VersionKnown);

        let mut recovery_attempts = None;
        if let Some(image) = image {
            state.enter(State::Updating);
            info!("Flashing firmware ({} bytes)", image.len());
            transfer(session, image, timings, progress)?;
            recovery_attempts = Some(wait_for_recovery(session, timings)?);
            state.enter(State::VersionKnown);
        }

        let final_version = read_version(session, timings.version_timeout)?;
        if image.is_some() {
            info!("Firmware version after update: {final_version}");
        }

        Ok(UpdateReport {
            initial_version,
            final_version,
            updated: image.is_some(),
            recovery_attempts,
        })
    }
}

fn read_version<P: Port, C: Clock>(
    session: &mut Session<P, C>,
    timeout: std::time::Duration,
) -> Result<String> {
    session
        .firmware_version(timeout)
        .map_err(|e| Error::VersionQuery(Box::new(e)))
}

struct StateLog(State);

impl StateLog {
    fn enter(&mut self, next: State) {
        debug!("State: {} -> {next}", self.0);
        self.0 = next;
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{FirmwareImage, Result, SystemClock, TransferState, UpdateReport, Updater};
    use crate::port::{FlowControl, NativePort, SerialConfig};

    impl Updater<SystemClock> {
        /// Run the workflow on a native serial port.
        pub fn run_native<F>(
            &self,
            port_name: &str,
            baud_rate: u32,
            flow_control: FlowControl,
            image: Option<&FirmwareImage>,
            progress: F,
        ) -> Result<UpdateReport>
        where
            F: FnMut(&TransferState),
        {
            self.run(
                port_name,
                |name| {
                    let config =
                        SerialConfig::new(name, baud_rate).with_flow_control(flow_control);
                    NativePort::open(&config)
                },
                image,
                progress,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timings;
    use crate::testing::{ManualClock, MockModem, Reply, init_logger};
    use crate::transfer::TransferStep;
    use std::time::Duration;

    fn updater(clock: &ManualClock) -> Updater<ManualClock> {
        let timings = Timings {
            recovery_window: Duration::from_secs(60),
            ..Timings::default()
        };
        Updater::with_clock(UpdateConfig::default().with_timings(timings), clock.clone())
    }

    fn image() -> FirmwareImage {
        FirmwareImage::new(vec![0x5A; 1000]).unwrap()
    }

    fn run(
        clock: &ManualClock,
        modem: &MockModem,
        image: Option<&FirmwareImage>,
    ) -> Result<UpdateReport> {
        init_logger();
        let port = modem.clone();
        updater(clock).run("mock", move |_| Ok(port), image, |_| {})
    }

    #[test]
    fn test_version_only_run() {
        let clock = ManualClock::new();
        let modem = MockModem::sara(clock.clone());

        let report = run(&clock, &modem, None).unwrap();

        assert!(!report.updated);
        assert_eq!(report.initial_version, "L0.0.00.00.05.06,A.02.00");
        assert_eq!(report.final_version, "L0.0.00.00.05.08,A.02.04");
        assert_eq!(report.recovery_attempts, None);
        assert_eq!(
            modem.commands(),
            vec!["AT".to_string(), "ATI9".to_string(), "ATI9".to_string()]
        );
        assert!(modem.data_writes().is_empty());
        assert_eq!(modem.close_count(), 1);
    }

    #[test]
    fn test_settle_delay_precedes_first_command() {
        let clock = ManualClock::new();
        let modem = MockModem::sara(clock.clone());

        run(&clock, &modem, None).unwrap();

        assert_eq!(clock.sleeps()[0], Duration::from_secs(2));
    }

    #[test]
    fn test_full_update() {
        let clock = ManualClock::new();
        let modem = MockModem::sara(clock.clone());
        let image = image();

        let mut percents = Vec::new();
        let port = modem.clone();
        let report = updater(&clock)
            .run("mock", move |_| Ok(port), Some(&image), |s| {
                percents.push(s.percent());
            })
            .unwrap();

        assert!(report.updated);
        assert_eq!(report.recovery_attempts, Some(1));
        assert_eq!(percents.last(), Some(&100));
        assert_eq!(
            modem.commands(),
            vec![
                "AT".to_string(),
                "ATI9".to_string(),
                "AT+ULSTFILE".to_string(),
                "AT+UDWNFILE=\"UPDATE.BIN\",1000,\"FOAT\"".to_string(),
                "AT+UFWINSTALL".to_string(),
                "AT".to_string(),
                "ATI9".to_string(),
            ]
        );
        assert_eq!(modem.data_writes().concat(), image.data());
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(2),
                Duration::from_secs(1),
                Duration::from_secs(10)
            ]
        );
        assert_eq!(modem.close_count(), 1);
    }

    #[test]
    fn test_connect_error() {
        let clock = ManualClock::new();
        let err = updater(&clock)
            .run::<MockModem, _, _>(
                "/dev/ttyACM9",
                |_| Err(Error::Io(std::io::ErrorKind::NotFound.into())),
                None,
                |_| {},
            )
            .unwrap_err();

        assert!(matches!(err, Error::Connect { ref port, .. } if port == "/dev/ttyACM9"));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_handshake_failure_is_terminal() {
        let clock = ManualClock::new();
        let modem = MockModem::sara(clock.clone());
        modem.silence("AT");

        let err = run(&clock, &modem, Some(&image())).unwrap_err();

        assert!(matches!(err, Error::ProtocolTimeout { ref command, .. } if command == "AT"));
        assert_eq!(modem.calls("AT"), 1);
        assert_eq!(modem.commands(), vec!["AT".to_string()]);
        assert_eq!(modem.close_count(), 1);
    }

    #[test]
    fn test_version_query_failure() {
        let clock = ManualClock::new();
        let modem = MockModem::sara(clock.clone());
        modem.on("ATI9", Reply::text("ERROR\r\n"));

        let err = run(&clock, &modem, None).unwrap_err();

        assert!(matches!(err, Error::VersionQuery(_)));
        assert_eq!(modem.close_count(), 1);
    }

    #[test]
    fn test_post_update_version_failure() {
        let clock = ManualClock::new();
        let modem = MockModem::sara(clock.clone());
        modem.on_call("ATI9", |n| {
            (n == 0).then(|| Reply::text("ATI9\r\r\nL0.0.00.00.05.06\r\nOK\r\n"))
        });

        let err = run(&clock, &modem, None).unwrap_err();

        assert!(matches!(err, Error::VersionQuery(_)));
        assert_eq!(modem.calls("ATI9"), 2);
        assert_eq!(modem.close_count(), 1);
    }

    #[test]
    fn test_close_once_for_each_failing_step() {
        type Inject = fn(&MockModem);
        let cases: [(&str, Inject); 8] = [
            ("handshake", |m| m.silence("AT")),
            ("version", |m| m.silence("ATI9")),
            ("list files", |m| m.silence("AT+ULSTFILE")),
            ("announce", |m| m.silence("AT+UDWNFILE=")),
            ("upload", |m| m.fail_data_write(2)),
            ("confirm", |m| m.set_upload_ack(None)),
            ("install", |m| m.silence("AT+UFWINSTALL")),
            ("watchdog", |m| {
                m.on_call("AT", |n| (n == 0).then(Reply::ok));
            }),
        ];

        for (name, inject) in cases {
            let clock = ManualClock::new();
            let modem = MockModem::sara(clock.clone());
            inject(&modem);

            let result = run(&clock, &modem, Some(&image()));

            assert!(result.is_err(), "{name} should fail");
            assert_eq!(modem.close_count(), 1, "{name} closed more than once");
        }
    }

    #[test]
    fn test_failures_report_transfer_step() {
        let clock = ManualClock::new();
        let modem = MockModem::sara(clock.clone());
        modem.silence("AT+UFWINSTALL");

        let err = run(&clock, &modem, Some(&image())).unwrap_err();

        assert!(matches!(
            err,
            Error::Transfer {
                step: TransferStep::Install,
                ..
            }
        ));
    }

    #[test]
    fn test_recovery_timeout_surfaces() {
        let clock = ManualClock::new();
        let modem = MockModem::sara(clock.clone());
        modem.on_call("AT", |n| (n == 0).then(Reply::ok));

        let err = run(&clock, &modem, Some(&image())).unwrap_err();

        assert!(matches!(err, Error::RecoveryTimeout { attempts: 60, .. }));
        assert_eq!(modem.calls("ATI9"), 1);
        assert_eq!(modem.close_count(), 1);
    }

    #[test]
    fn test_invalid_config_fails_before_open() {
        let clock = ManualClock::new();
        let updater = Updater::with_clock(UpdateConfig::default().with_payload_size(0), clock);
        let mut opened = false;

        let err = updater
            .run::<MockModem, _, _>(
                "mock",
                |_| {
                    opened = true;
                    Err(Error::SessionClosed)
                },
                None,
                |_| {},
            )
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert!(!opened);
    }
}
