//! AT command set used by the SARA firmware update (FOAT) procedure.
//!
//! The literals here are the compatibility surface with the module
//! firmware and must be sent byte for byte.

/// Terminator appended to every command line.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Payload bytes per upload write for this protocol revision.
pub const PAYLOAD_SIZE: usize = 128;

/// Handshake command.
pub const HANDSHAKE: &str = "AT";

/// Firmware version query.
pub const VERSION_QUERY: &str = "ATI9";

/// File system listing.
pub const LIST_FILES: &str = "AT+ULSTFILE";

/// Prefix of a file listing response.
pub const LIST_FILES_PREFIX: &str = "+ULSTFILE:";

/// Firmware install trigger.
pub const INSTALL: &str = "AT+UFWINSTALL";

/// Final result code of a successful command.
pub const OK: &str = "OK";

/// Prompt sent when the module is ready to receive file data.
pub const DOWNLOAD_PROMPT: &str = ">";

/// In-module file name the update image is stored under.
pub const UPDATE_FILE_NAME: &str = "UPDATE.BIN";

/// Storage area tag for firmware-over-AT images.
pub const FOAT_TAG: &str = "FOAT";

/// Build the command announcing a file download of `length` bytes.
pub fn download_file(name: &str, length: usize, tag: &str) -> String {
    format!("AT+UDWNFILE=\"{name}\",{length},\"{tag}\"")
}

/// Announce the firmware update image.
pub fn download_update(length: usize) -> String {
    download_file(UPDATE_FILE_NAME, length, FOAT_TAG)
}

/// Build a full command line.
pub fn command_line(command: &str) -> String {
    format!("{command}{LINE_TERMINATOR}")
}

/// Extract the information text from a command response.
///
/// Drops the echoed command, blank lines and the final `OK`.
pub fn information_text(command: &str, response: &str) -> String {
    response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != command && *line != OK)
        .collect::<Vec<_>>()
        .join(" ")
}
