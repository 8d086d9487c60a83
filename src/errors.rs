//! Error types shared across the shell.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all shell failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or socket I/O failure.
    Io(String),
    /// Malformed, truncated, or timed-out connection handshake.
    Handshake(String),
    /// Handshake supplied a secret that does not match the listener's key.
    Unauthorized(String),
    /// Discovery record could not be published.
    Discovery(String),
    /// History file could not be opened, read, or appended.
    History(String),
    /// Evaluation pipeline is no longer accepting work.
    Pipeline(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Discovery(msg) => write!(f, "discovery: {msg}"),
            Self::History(msg) => write!(f, "history: {msg}"),
            Self::Pipeline(msg) => write!(f, "pipeline: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Handshake(format!("invalid json: {err}"))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
