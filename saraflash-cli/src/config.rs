//! Configuration file support for saraflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SARAFLASH_*)
//! 3. Local config file (./saraflash.toml)
//! 4. Global config file (~/.config/saraflash/config.toml)
//!
//! `--config <PATH>` replaces both config files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use log::{debug, warn};
use saraflash::Timings;
use serde::{Deserialize, Serialize};

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "saraflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Flow control ("none", "hardware", "software").
    pub flow_control: Option<String>,
}

/// Overrides for the update policy.
///
/// Durations are in milliseconds except the recovery window, which is in
/// seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    pub settle_delay_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub version_timeout_ms: Option<u64>,
    pub list_files_timeout_ms: Option<u64>,
    pub announce_timeout_ms: Option<u64>,
    pub upload_settle_delay_ms: Option<u64>,
    pub upload_ack_timeout_ms: Option<u64>,
    pub install_timeout_ms: Option<u64>,
    pub reboot_delay_ms: Option<u64>,
    pub recovery_window_secs: Option<u64>,
    pub recovery_poll_interval_ms: Option<u64>,
}

impl TimingConfig {
    /// Apply every override that is set.
    pub fn apply(&self, timings: &mut Timings) {
        let ms = |value: Option<u64>, target: &mut Duration| {
            if let Some(v) = value {
                *target = Duration::from_millis(v);
            }
        };
        ms(self.settle_delay_ms, &mut timings.settle_delay);
        ms(self.handshake_timeout_ms, &mut timings.handshake_timeout);
        ms(self.version_timeout_ms, &mut timings.version_timeout);
        ms(self.list_files_timeout_ms, &mut timings.list_files_timeout);
        ms(self.announce_timeout_ms, &mut timings.announce_timeout);
        ms(self.upload_settle_delay_ms, &mut timings.upload_settle_delay);
        ms(self.upload_ack_timeout_ms, &mut timings.upload_ack_timeout);
        ms(self.install_timeout_ms, &mut timings.install_timeout);
        ms(self.reboot_delay_ms, &mut timings.reboot_delay);
        ms(
            self.recovery_poll_interval_ms,
            &mut timings.recovery_poll_interval,
        );
        if let Some(secs) = self.recovery_window_secs {
            timings.recovery_window = Duration::from_secs(secs);
        }
    }

    fn merge(&mut self, other: Self) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        take!(
            settle_delay_ms,
            handshake_timeout_ms,
            version_timeout_ms,
            list_files_timeout_ms,
            announce_timeout_ms,
            upload_settle_delay_ms,
            upload_ack_timeout_ms,
            install_timeout_ms,
            reboot_delay_ms,
            recovery_window_secs,
            recovery_poll_interval_ms
        );
    }
}

/// Companion programmer used to install and restore the uploader application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgrammerConfig {
    /// Executable to run (default: `bossac`).
    pub program: Option<String>,
    /// Argument template; `{port}` and `{binary}` are substituted.
    pub args: Option<Vec<String>>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Timing overrides.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Companion programmer configuration.
    #[serde(default)]
    pub programmer: ProgrammerConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| warn!("Failed to parse config file {}: {}", path.display(), e))
                .ok(),
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "saraflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.connection.flow_control.is_some() {
            self.connection.flow_control = other.connection.flow_control;
        }

        self.timing.merge(other.timing);

        if other.programmer.program.is_some() {
            self.programmer.program = other.programmer.program;
        }
        if other.programmer.args.is_some() {
            self.programmer.args = other.programmer.args;
        }
    }

    /// Update policy with every configured override applied.
    pub fn timings(&self) -> Timings {
        let mut timings = Timings::default();
        self.timing.apply(&mut timings);
        timings
    }
}
