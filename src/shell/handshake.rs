//! Connection handshake: header extraction and option negotiation.
//!
//! A client opens the connection by sending one JSON object followed by a
//! newline:
//!
//! ```json
//! {"key":"5b0f…","columns":120,"prompt":"app> "}
//! {"key":"5b0f…","evaluateAndExit":{"command":"1+1"}}
//! ```
//!
//! [`FrameReader`] pulls that header off the raw stream and hands back a
//! [`PayloadStream`] that replays whatever bytes arrived behind the header
//! before continuing with the socket itself. [`HandshakeRequest`] then
//! validates the secret and resolves the client's display preferences into
//! [`SessionOptions`].
//!
//! The session's input and output are never part of the negotiated options:
//! the listener always wires the payload stream and the socket in directly,
//! so a client cannot redirect them.

use std::io::Cursor;

use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, Chain};
use tokio_util::codec::FramedRead;
use tracing::debug;

use crate::config::SessionDefaults;
use crate::shell::codec::HandshakeCodec;
use crate::{AppError, Result};

/// Option names the host always controls.
const HOST_ONLY_OPTIONS: [&str; 3] = ["input", "output", "useGlobal"];

/// Post-handshake byte stream: leftover header-buffer bytes, then the source.
pub type PayloadStream<R> = Chain<Cursor<Bytes>, R>;

/// Splits the JSON handshake header off a raw byte stream.
pub struct FrameReader<R> {
    framed: FramedRead<R, HandshakeCodec>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap `reader`, accepting headers up to `max_header_bytes`.
    #[must_use]
    pub fn new(reader: R, max_header_bytes: usize) -> Self {
        Self {
            framed: FramedRead::new(reader, HandshakeCodec::new(max_header_bytes)),
        }
    }

    /// Read the header and return it with the payload stream.
    ///
    /// Consumes the reader, so framing state is released exactly once on
    /// every path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` if the stream closes, fails, or exceeds
    /// the header limit before a complete JSON value arrives.
    pub async fn split_header(mut self) -> Result<(Value, PayloadStream<R>)> {
        match self.framed.next().await {
            Some(Ok(header)) => {
                let parts = self.framed.into_parts();
                let leftover = parts.read_buf.freeze();
                debug!(leftover = leftover.len(), "handshake header decoded");
                Ok((header, Cursor::new(leftover).chain(parts.io)))
            }
            Some(Err(AppError::Io(msg))) => Err(AppError::Handshake(format!(
                "connection failed during handshake: {msg}"
            ))),
            Some(Err(err)) => Err(err),
            None => Err(AppError::Handshake(
                "connection closed before handshake completed".into(),
            )),
        }
    }
}

/// One-shot evaluation request carried in the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluateAndExit {
    /// Source text to evaluate.
    pub command: String,
    /// Name reported as the evaluation's origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Client-supplied handshake header.
///
/// Parsed leniently by [`HandshakeRequest::from_header`]: `key` and
/// `columns` are kept as raw values, and a display option of the wrong type
/// is left in `extra` so the default applies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    /// Shared secret from the discovery record. Only a string can match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Value>,
    /// Terminal width hint, discarded by the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Value>,
    /// Evaluate one command, reply, and close.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluate_and_exit: Option<EvaluateAndExit>,
    /// Interactive prompt override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Terminal mode override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<bool>,
    /// Color override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_colors: Option<bool>,
    /// Undefined-result suppression override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_undefined: Option<bool>,
    /// Any other display options, passed through.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HandshakeRequest {
    /// Interpret a decoded header.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` if the header is not an object or
    /// `evaluateAndExit` is present but is not a `{"command": string}`
    /// object.
    pub fn from_header(header: Value) -> Result<Self> {
        let Value::Object(mut fields) = header else {
            return Err(AppError::Handshake("header must be a json object".into()));
        };

        let evaluate_and_exit = match fields.remove("evaluateAndExit") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value(raw).map_err(|err| {
                AppError::Handshake(format!("invalid evaluateAndExit request: {err}"))
            })?),
        };

        Ok(Self {
            key: fields.remove("key"),
            columns: fields.remove("columns"),
            evaluate_and_exit,
            prompt: take_typed(&mut fields, "prompt", |v| v.as_str().map(str::to_owned)),
            terminal: take_typed(&mut fields, "terminal", Value::as_bool),
            use_colors: take_typed(&mut fields, "useColors", Value::as_bool),
            ignore_undefined: take_typed(&mut fields, "ignoreUndefined", Value::as_bool),
            extra: fields,
        })
    }

    /// Check the supplied secret against the listener's.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unauthorized` unless the key is a string equal to
    /// `expected`.
    pub fn authorize(&self, expected: &str) -> Result<()> {
        match &self.key {
            Some(Value::String(key)) if key == expected => Ok(()),
            Some(_) => Err(AppError::Unauthorized("handshake key mismatch".into())),
            None => Err(AppError::Unauthorized("handshake key missing".into())),
        }
    }

    /// Resolve the negotiated options.
    ///
    /// Drops `key` and `columns`, discards any attempt to set host-only
    /// options, and fills unset display options from `defaults`. In one-shot
    /// mode the prompt is forced empty so no prompt text reaches a client
    /// that is waiting for a JSON reply.
    #[must_use]
    pub fn into_options(self, defaults: &SessionDefaults) -> SessionOptions {
        let Self {
            key: _,
            columns,
            evaluate_and_exit,
            prompt,
            terminal,
            use_colors,
            ignore_undefined,
            mut extra,
        } = self;

        for name in HOST_ONLY_OPTIONS {
            if extra.remove(name).is_some() {
                debug!(option = name, "ignoring client attempt to set host-only option");
            }
        }
        debug!(?columns, "terminal width hint discarded");

        let prompt = if evaluate_and_exit.is_some() {
            String::new()
        } else {
            prompt.unwrap_or_else(|| defaults.prompt.clone())
        };

        SessionOptions {
            prompt,
            terminal: terminal.unwrap_or(defaults.terminal),
            use_colors: use_colors.unwrap_or(defaults.use_colors),
            ignore_undefined: ignore_undefined.unwrap_or(defaults.ignore_undefined),
            use_global: false,
            evaluate_and_exit,
            extra,
        }
    }
}

/// Options a session runs with after negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Prompt text; empty means no prompt is written.
    pub prompt: String,
    /// Whether the client is driving a terminal. Colors are only written to
    /// terminals.
    pub terminal: bool,
    /// Whether rendered values use ANSI colors.
    pub use_colors: bool,
    /// Suppress output for evaluations that produce no value.
    pub ignore_undefined: bool,
    /// Whether evaluation targets the shared process-wide context. Always
    /// `false` out of negotiation; set by the session when it binds to the
    /// pipeline. Informational only: every evaluation goes through the one
    /// shared pipeline.
    pub use_global: bool,
    /// One-shot request, if any.
    pub evaluate_and_exit: Option<EvaluateAndExit>,
    /// Display options the shell does not interpret. Carried so hosts can
    /// inspect what the client asked for; logged when a session starts.
    pub extra: Map<String, Value>,
}

impl SessionOptions {
    /// Whether output should carry ANSI colors.
    #[must_use]
    pub fn colors(&self) -> bool {
        self.terminal && self.use_colors
    }
}

/// Remove `name` from `fields` if `read` accepts its value. A value of the
/// wrong type stays behind as a passthrough option.
fn take_typed<T>(
    fields: &mut Map<String, Value>,
    name: &str,
    read: fn(&Value) -> Option<T>,
) -> Option<T> {
    let value = fields.get(name).and_then(read);
    if value.is_some() {
        fields.remove(name);
    } else if fields.contains_key(name) {
        debug!(option = name, "ignoring display option with unexpected type");
    }
    value
}
