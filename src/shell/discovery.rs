//! Discovery record: where to connect, and with which secret.
//!
//! The record lives at `<shell_dir>/info.json` and is always one complete
//! JSON document:
//!
//! ```json
//! {"status":"enabled","port":40123,"key":"5b0f…"}
//! {"status":"disabled","reason":"shell shut down"}
//! ```
//!
//! Every write unlinks the previous file first and recreates it with
//! owner-only permissions, so a stale record from a crashed host never keeps
//! looser permissions than the current one.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DISCOVERY_FILE;
use crate::{AppError, Result};

/// Contents of the discovery file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DiscoveryRecord {
    /// The shell is listening.
    Enabled {
        /// Loopback port of the listener.
        port: u16,
        /// One-time shared secret expected in the handshake.
        key: String,
    },
    /// The shell is not accepting connections.
    Disabled {
        /// Why the shell is unavailable.
        reason: String,
    },
}

impl DiscoveryRecord {
    /// Whether a client may connect using this record.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    /// Read the record from `dir`.
    ///
    /// A missing or unparsable file reads as [`DiscoveryRecord::Disabled`], so
    /// callers only ever connect on an explicit `enabled` record.
    #[must_use]
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(DISCOVERY_FILE);
        match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|err| Self::Disabled {
                reason: format!("unreadable discovery record: {err}"),
            }),
            Err(err) => Self::Disabled {
                reason: format!("no discovery record at {}: {err}", path.display()),
            },
        }
    }
}

/// Announce a listening shell.
///
/// Creates `dir` if needed, removes any stale record, then writes an
/// `enabled` record readable only by the owner.
///
/// # Errors
///
/// Returns `AppError::Discovery` if the directory or record cannot be
/// written.
pub fn publish(dir: &Path, port: u16, key: &str) -> Result<()> {
    fs::create_dir_all(dir).map_err(|err| {
        AppError::Discovery(format!("failed to create {}: {err}", dir.display()))
    })?;

    let record = DiscoveryRecord::Enabled {
        port,
        key: key.to_owned(),
    };
    replace_record(dir, &record).map_err(|err| {
        AppError::Discovery(format!("failed to write discovery record: {err}"))
    })?;

    info!(dir = %dir.display(), port, "discovery record published");
    Ok(())
}

/// Mark the shell as unavailable. Never fails; teardown paths call this.
pub fn disable(dir: &Path, reason: &str) {
    let record = DiscoveryRecord::Disabled {
        reason: reason.to_owned(),
    };
    match replace_record(dir, &record) {
        Ok(()) => info!(dir = %dir.display(), reason, "discovery record disabled"),
        Err(err) => warn!(dir = %dir.display(), %err, "failed to disable discovery record"),
    }
}

/// Unlink the current record (absence is fine) and write `record` in one go.
fn replace_record(dir: &Path, record: &DiscoveryRecord) -> io::Result<()> {
    let path = dir.join(DISCOVERY_FILE);

    if let Err(err) = fs::remove_file(&path) {
        debug!(path = %path.display(), %err, "no stale discovery record removed");
    }

    let body = serde_json::to_vec(record)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&path)?;
    file.write_all(&body)?;
    file.flush()
}
