//! # saraflash
//!
//! A library for updating the firmware of u-blox SARA cellular modules.
//!
//! The module is driven through its AT command interface using the
//! firmware-over-AT (FOAT) procedure:
//!
//! - Handshake and firmware version query
//! - `AT+UDWNFILE` upload of the image in 128-byte writes
//! - `AT+UFWINSTALL` and polling until the module answers again
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use saraflash::{FirmwareImage, FlowControl, UpdateConfig, Updater};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("SARA-R410M-02B.bin")?;
//!     let updater = Updater::new(UpdateConfig::default());
//!
//!     let report = updater.run_native(
//!         "/dev/ttyACM0",
//!         115200,
//!         FlowControl::None,
//!         Some(&image),
//!         |state| println!("Flashing: {}%", state.percent()),
//!     )?;
//!
//!     println!("Now running {}", report.final_version);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod error;
pub mod port;
pub mod protocol;
pub mod session;
pub mod transfer;
pub mod updater;
pub mod watchdog;

#[cfg(test)]
mod testing;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    clock::{Clock, SystemClock},
    config::{Timings, UpdateConfig},
    error::{Error, Result},
    port::{FlowControl, Port, SerialConfig},
    protocol::{Expectation, expect},
    session::Session,
    transfer::{FirmwareImage, TransferState, TransferStep, transfer},
    updater::{UpdateReport, Updater},
    watchdog::wait_for_recovery,
};
