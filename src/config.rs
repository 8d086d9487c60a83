//! Shell configuration parsing and validation.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Name of the discovery record inside the shell directory.
pub const DISCOVERY_FILE: &str = "info.json";

/// Name of the history log inside the shell directory.
pub const HISTORY_FILE: &str = "history";

/// Display defaults applied to any option a client leaves unset.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionDefaults {
    /// Interactive prompt text.
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// Whether the client is driving a terminal.
    #[serde(default = "default_true")]
    pub terminal: bool,
    /// Whether rendered values use ANSI colors.
    #[serde(default = "default_true")]
    pub use_colors: bool,
    /// Suppress output for evaluations that produce no value.
    #[serde(default = "default_true")]
    pub ignore_undefined: bool,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            terminal: true,
            use_colors: true,
            ignore_undefined: true,
        }
    }
}

fn default_prompt() -> String {
    "> ".into()
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_handshake_timeout_ms() -> u64 {
    1000
}

fn default_max_header_bytes() -> usize {
    1_048_576
}

/// Shell configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ShellConfig {
    /// Directory holding the discovery record and history log.
    pub shell_dir: PathBuf,
    /// Loopback address the listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Deadline for a connection to deliver its handshake.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Upper bound on the size of the JSON handshake header.
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    /// Display defaults for new sessions.
    #[serde(default)]
    pub session: SessionDefaults,
}

impl ShellConfig {
    /// Default configuration rooted at `shell_dir`.
    #[must_use]
    pub fn new(shell_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell_dir: shell_dir.into(),
            bind_address: default_bind_address(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_header_bytes: default_max_header_bytes(),
            session: SessionDefaults::default(),
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the discovery record.
    #[must_use]
    pub fn discovery_path(&self) -> PathBuf {
        self.shell_dir.join(DISCOVERY_FILE)
    }

    /// Path of the history log.
    #[must_use]
    pub fn history_path(&self) -> PathBuf {
        self.shell_dir.join(HISTORY_FILE)
    }

    /// Handshake deadline as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the bind address is not loopback or a
    /// limit is zero.
    pub fn validate(&self) -> Result<()> {
        if !self.bind_address.is_loopback() {
            return Err(AppError::Config(format!(
                "bind_address must be a loopback address, got {}",
                self.bind_address
            )));
        }

        if self.handshake_timeout_ms == 0 {
            return Err(AppError::Config(
                "handshake_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.max_header_bytes == 0 {
            return Err(AppError::Config(
                "max_header_bytes must be greater than zero".into(),
            ));
        }

        if self.shell_dir.as_os_str().is_empty() {
            return Err(AppError::Config("shell_dir must not be empty".into()));
        }

        Ok(())
    }
}
