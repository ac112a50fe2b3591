//! Chunked firmware upload over `AT+UDWNFILE`.
//!
//! ## Sequence
//!
//! ```text
//! host                                   module
//!  | AT+ULSTFILE                  ------>  |
//!  |                  <------ +ULSTFILE:   |
//!  | AT+UDWNFILE="UPDATE.BIN",N,"FOAT" ->  |
//!  |                  <------ >            |
//!  | N bytes, 128 per write       ------>  |
//!  |                  <------ OK           |
//!  | AT+UFWINSTALL                ------>  |
//!  |                  <------ OK           |
//! ```

use std::fmt;
use std::path::Path;

use log::{debug, info, trace};

use crate::clock::Clock;
use crate::config::Timings;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{Expectation, at};
use crate::session::Session;

/// Firmware image to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Wrap raw image bytes. Empty images are rejected.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidImage("image is empty".into()));
        }
        Ok(Self { data })
    }

    /// Read an image from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::new(data)
    }

    /// Image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false; empty images cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Upload position within an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferState {
    offset: usize,
    total: usize,
}

impl TransferState {
    fn new(total: usize) -> Self {
        Self { offset: 0, total }
    }

    fn advance(&mut self, len: usize) {
        debug_assert!(self.offset + len <= self.total);
        self.offset += len;
    }

    /// Bytes written so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Image length.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Percent complete, rounded down; 100 only once every byte is written.
    #[allow(clippy::cast_possible_truncation)]
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.offset * 100 / self.total) as u8
    }
}

/// Steps of the transfer sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStep {
    /// `AT+ULSTFILE` readiness check.
    ListFiles,
    /// `AT+UDWNFILE` announcement.
    Announce,
    /// Streaming the image bytes.
    Upload,
    /// Waiting for the upload acknowledgment.
    Confirm,
    /// `AT+UFWINSTALL`.
    Install,
}

impl fmt::Display for TransferStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListFiles => write!(f, "list files"),
            Self::Announce => write!(f, "announce file"),
            Self::Upload => write!(f, "upload"),
            Self::Confirm => write!(f, "confirm upload"),
            Self::Install => write!(f, "install"),
        }
    }
}

fn at_step<T>(step: TransferStep, result: Result<T>) -> Result<T> {
    result.map_err(|source| Error::Transfer {
        step,
        source: Box::new(source),
    })
}

/// Upload `image` and trigger its installation.
///
/// `progress` is called after every chunk. Nothing is retried: the first
/// failing step ends the transfer with [`Error::Transfer`].
pub fn transfer<P, C, F>(
    session: &mut Session<P, C>,
    image: &FirmwareImage,
    timings: &Timings,
    mut progress: F,
) -> Result<()>
where
    P: Port,
    C: Clock,
    F: FnMut(&TransferState),
{
    info!("Checking module file system");
    at_step(
        TransferStep::ListFiles,
        session.expect(&Expectation::new(
            at::LIST_FILES,
            at::LIST_FILES_PREFIX,
            timings.list_files_timeout,
        )),
    )?;

    info!(
        "Announcing {} ({} bytes)",
        at::UPDATE_FILE_NAME,
        image.len()
    );
    let announce = at::download_update(image.len());
    at_step(
        TransferStep::Announce,
        session.expect(&Expectation::new(
            &announce,
            at::DOWNLOAD_PROMPT,
            timings.announce_timeout,
        )),
    )?;

    info!("Uploading firmware");
    at_step(
        TransferStep::Upload,
        upload(session, image, &mut progress),
    )?;

    debug!("Waiting for upload acknowledgment");
    session.sleep(timings.upload_settle_delay);
    at_step(
        TransferStep::Confirm,
        session.expect(&Expectation::wait_for(at::OK, timings.upload_ack_timeout)),
    )?;

    info!("Installing firmware");
    at_step(
        TransferStep::Install,
        session.expect(&Expectation::new(
            at::INSTALL,
            at::OK,
            timings.install_timeout,
        )),
    )?;

    Ok(())
}

fn upload<P, C, F>(session: &mut Session<P, C>, image: &FirmwareImage, progress: &mut F) -> Result<()>
where
    P: Port,
    C: Clock,
    F: FnMut(&TransferState),
{
    let mut state = TransferState::new(image.len());
    for chunk in image.data().chunks(session.payload_size()) {
        session.write_chunk(state.offset(), chunk)?;
        state.advance(chunk.len());
        trace!("Uploaded {}/{} ({}%)", state.offset(), state.total(), state.percent());
        progress(&state);
    }
    Ok(())
}
