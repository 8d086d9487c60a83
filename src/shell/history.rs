//! Durable history of submitted lines.
//!
//! The log is plain text, one line per submission, append-only. Each session
//! loads it into a recall list where a repeated line keeps only its most
//! recent position.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{AppError, Result};

/// Session-scoped handle on the history log plus its recall list.
#[derive(Debug)]
pub struct HistoryStore {
    path: Option<PathBuf>,
    file: Option<File>,
    recall: Vec<String>,
}

impl HistoryStore {
    /// Open (creating if needed) the history log at `path` and load it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::History` if the file cannot be opened or read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let mut options = OpenOptions::new();
        options.read(true).append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&path).map_err(|err| {
            AppError::History(format!("failed to open {}: {err}", path.display()))
        })?;

        let mut raw = String::new();
        file.read_to_string(&mut raw).map_err(|err| {
            AppError::History(format!("failed to read {}: {err}", path.display()))
        })?;

        let recall = fold_history(raw.lines());
        debug!(path = %path.display(), entries = recall.len(), "history loaded");

        Ok(Self {
            path: Some(path),
            file: Some(file),
            recall,
        })
    }

    /// A store with no backing file; appends only update the recall list.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: None,
            recall: Vec::new(),
        }
    }

    /// Recall list, oldest first.
    #[must_use]
    pub fn recall(&self) -> &[String] {
        &self.recall
    }

    /// Path of the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether the backing file is still held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Record a submitted line. Blank lines are ignored; once the store is
    /// closed only the recall list is updated.
    ///
    /// # Errors
    ///
    /// Returns `AppError::History` if the write fails.
    pub fn append(&mut self, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }

        remember(&mut self.recall, line);

        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        writeln!(file, "{line}")
            .and_then(|()| file.flush())
            .map_err(|err| AppError::History(format!("failed to append history: {err}")))
    }

    /// Release the backing file. Idempotent and never fails.
    pub fn close(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(err) = file.sync_all() {
                warn!(%err, "failed to sync history on close");
            }
        }
    }
}

impl Drop for HistoryStore {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fold raw history lines into a recall list.
///
/// Blank lines are skipped. A line seen again moves to its newer position;
/// surviving lines otherwise keep their relative order.
#[must_use]
pub fn fold_history<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut recall = Vec::new();
    for line in lines {
        if !line.trim().is_empty() {
            remember(&mut recall, line);
        }
    }
    recall
}

fn remember(recall: &mut Vec<String>, line: &str) {
    recall.retain(|existing| existing != line);
    recall.push(line.to_owned());
}
