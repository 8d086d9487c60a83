//! Guarded writer for the client side of a connection.
//!
//! Once a connection is closed (by us, by the client, or by a failed write)
//! every further write is silently dropped. Callers never see write errors:
//! a vanished client simply stops receiving output.

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Line written when a session ends intentionally or a connection is refused.
pub const EXIT_BANNER: &str = "Shell exiting...";

/// Client-facing output with a "still open" guard.
pub struct ShellOutput<W> {
    writer: W,
    open: bool,
}

impl<W: AsyncWrite + Unpin> ShellOutput<W> {
    /// Wrap an open writer.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer, open: true }
    }

    /// Whether output is still being delivered.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Write `text` if the connection is still open.
    pub async fn write(&mut self, text: &str) {
        if !self.open || text.is_empty() {
            return;
        }

        let result = async {
            self.writer.write_all(text.as_bytes()).await?;
            self.writer.flush().await
        }
        .await;

        if let Err(err) = result {
            debug!(%err, "client output closed, dropping further writes");
            self.open = false;
        }
    }

    /// Write `text` followed by a newline.
    pub async fn write_line(&mut self, text: &str) {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.write(&line).await;
    }

    /// Serialize `value` as one compact JSON line.
    pub async fn write_json_line<T: Serialize>(&mut self, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.write_line(&json).await,
            Err(err) => debug!(%err, "failed to serialize json reply"),
        }
    }

    /// Write [`EXIT_BANNER`].
    pub async fn write_banner(&mut self) {
        self.write_line(EXIT_BANNER).await;
    }

    /// Shut the writer down. Idempotent.
    pub async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(err) = self.writer.shutdown().await {
            debug!(%err, "client output already closed");
        }
    }

    /// Write the banner, then close.
    pub async fn exit(&mut self) {
        self.write_banner().await;
        self.close().await;
    }
}
