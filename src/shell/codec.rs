//! Framing codecs for shell connections.
//!
//! A connection starts with a JSON handshake header and continues as a raw
//! line-oriented payload stream, so two codecs are involved:
//!
//! - [`HandshakeCodec`] extracts exactly one JSON value from the front of the
//!   stream and leaves every byte after it untouched in the read buffer.
//! - [`LineCodec`] splits the interactive payload into lines, tolerating
//!   invalid UTF-8 and skipping lines over the length limit.

use bytes::{Buf, BytesMut};
use serde_json::Value;
use tokio_util::codec::Decoder;

use crate::{AppError, Result};

/// Default ceiling for a handshake header and for one interactive line: 1 MiB.
pub const MAX_FRAME_BYTES: usize = 1_048_576;

/// Decoder for the JSON handshake header.
///
/// Bytes are consumed one newline-terminated fragment at a time. Each
/// fragment is appended to a candidate buffer and the whole candidate is
/// strictly parsed; a parse failure only means more data is needed. Bytes
/// without a newline yet stay in the source buffer until the rest of their
/// line arrives. Parsing is strict, so a line whose braces balance but whose
/// string is unterminated is never mistaken for a complete header.
///
/// After the first value is produced the decoder yields nothing more, and
/// everything behind the consumed line remains in the source buffer for the
/// payload stream.
#[derive(Debug)]
pub struct HandshakeCodec {
    candidate: Vec<u8>,
    max_bytes: usize,
    finished: bool,
}

impl HandshakeCodec {
    /// Create a decoder that rejects headers larger than `max_bytes`.
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            candidate: Vec::new(),
            max_bytes,
            finished: false,
        }
    }

    /// Whether the header has been produced.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn too_large(&self) -> AppError {
        AppError::Handshake(format!(
            "header exceeds {} bytes without a complete json value",
            self.max_bytes
        ))
    }
}

impl Default for HandshakeCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_BYTES)
    }
}

impl Decoder for HandshakeCodec {
    type Item = Value;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>> {
        if self.finished {
            return Ok(None);
        }

        while let Some(newline) = src.iter().position(|b| *b == b'\n') {
            let fragment = src.split_to(newline + 1);
            self.candidate.extend_from_slice(&fragment);

            if self.candidate.len() > self.max_bytes {
                return Err(self.too_large());
            }

            if let Ok(value) = serde_json::from_slice::<Value>(&self.candidate) {
                self.finished = true;
                self.candidate = Vec::new();
                return Ok(Some(value));
            }
        }

        if self.candidate.len() + src.len() > self.max_bytes {
            return Err(self.too_large());
        }

        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Value>> {
        match self.decode(src)? {
            Some(value) => Ok(Some(value)),
            None if self.finished => Ok(None),
            None => Err(AppError::Handshake(
                "connection closed before handshake completed".into(),
            )),
        }
    }
}

/// One decoded line of interactive input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    /// Line text without its terminator. Invalid UTF-8 is replaced with
    /// U+FFFD.
    Text(String),
    /// A line longer than the limit; its bytes were discarded.
    Overlong,
}

/// Line codec for the interactive payload stream.
///
/// Strips the trailing `\n` (and `\r`) from each line. Unlike
/// [`tokio_util::codec::LinesCodec`], neither invalid UTF-8 nor an over-long
/// line is a stream error: the first is decoded lossily and the second is
/// skipped up to its newline and reported as [`InputLine::Overlong`], so one
/// bad line never ends the session.
#[derive(Debug)]
pub struct LineCodec {
    max_length: usize,
    next_index: usize,
    discarding: bool,
}

impl LineCodec {
    /// Create a codec with the default [`MAX_FRAME_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_BYTES)
    }

    /// Create a codec that rejects lines longer than `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    /// Longest accepted line, in bytes.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = InputLine;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<InputLine>> {
        loop {
            let read_to = src.len().min(self.max_length.saturating_add(1));
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| offset + self.next_index);

            match (self.discarding, newline) {
                (true, Some(end)) => {
                    src.advance(end + 1);
                    self.discarding = false;
                    self.next_index = 0;
                    return Ok(Some(InputLine::Overlong));
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(end)) => {
                    self.next_index = 0;
                    let line = src.split_to(end + 1);
                    return Ok(Some(InputLine::Text(decode_line(&line[..end]))));
                }
                (false, None) if src.len() > self.max_length => {
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<InputLine>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            src.clear();
            return Ok(Some(InputLine::Overlong));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let line = src.split_to(src.len());
        Ok(Some(InputLine::Text(decode_line(&line))))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
