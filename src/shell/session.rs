//! Interactive and one-shot sessions.
//!
//! A [`Session`] reads lines from the payload stream, submits them to the
//! shared [`EvalPipeline`], and writes rendered results back. Lines that end
//! in the middle of a statement are buffered until the evaluator accepts
//! them. A few dot-directives are handled by the session itself:
//!
//! | Directive  | Effect                                              |
//! |------------|-----------------------------------------------------|
//! | `.exit`    | write the exit banner and close                     |
//! | `.reload`  | close and ask the host to restart                   |
//! | `.break`   | discard a partially entered statement               |
//! | `.history` | print the recall list                               |
//! | `.help`    | list directives                                     |

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::eval::pipeline::EvalPipeline;
use crate::eval::{EvalError, Evaluation, HostHooks};
use crate::shell::codec::{InputLine, LineCodec};
use crate::shell::handshake::{EvaluateAndExit, SessionOptions};
use crate::shell::history::HistoryStore;
use crate::shell::output::ShellOutput;
use crate::shell::render::{render_error, render_value};
use crate::Result;

/// Prompt shown while a statement is incomplete.
pub const CONTINUATION_PROMPT: &str = "... ";

/// Origin reported for one-shot evaluations without a filename.
pub const ONE_SHOT_ORIGIN: &str = "[eval]";

const HELP_TEXT: &str = "\
.break    Discard the statement being entered
.exit     Exit the shell
.help     Print this help message
.history  Print the command history
.reload   Restart the host process";

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client asked to leave with `.exit`.
    Exit,
    /// The client's input stream ended or failed.
    InputClosed,
    /// The client asked the host to restart.
    Reload,
    /// The host is shutting the shell down.
    HostShutdown,
}

#[derive(Debug, PartialEq, Eq)]
enum Directive {
    Exit,
    Reload,
    Break,
    History,
    Help,
    Unknown(String),
}

/// One interactive client bound to the shared evaluation context.
pub struct Session<R, W> {
    id: u64,
    origin: String,
    options: SessionOptions,
    input: FramedRead<R, LineCodec>,
    output: ShellOutput<W>,
    pipeline: EvalPipeline,
    history: HistoryStore,
    pending: Vec<String>,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Bind a connection to the pipeline and expose host modules to it.
    ///
    /// Module installation is queued ahead of the session's first
    /// evaluation; the prompt does not wait for it.
    #[must_use]
    pub fn start(
        id: u64,
        mut options: SessionOptions,
        input: R,
        output: ShellOutput<W>,
        pipeline: EvalPipeline,
        history: HistoryStore,
        hooks: &HostHooks,
    ) -> Self {
        install_modules(&pipeline, hooks);
        options.use_global = true;

        debug!(
            session = id,
            history = history.recall().len(),
            terminal = options.terminal,
            extra = ?options.extra,
            "session started"
        );

        Self {
            id,
            origin: format!("shell-{id}"),
            options,
            input: FramedRead::new(input, LineCodec::new()),
            output,
            pipeline,
            history,
            pending: Vec::new(),
        }
    }

    /// Serve the client until it leaves or `shutdown` fires.
    pub async fn run(mut self, shutdown: &CancellationToken) -> SessionEnd {
        self.write_prompt().await;

        let end = loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => break SessionEnd::HostShutdown,
                next = self.input.next() => next,
            };

            match next {
                None => break SessionEnd::InputClosed,
                Some(Err(err)) => {
                    warn!(session = self.id, %err, "session input failed");
                    break SessionEnd::InputClosed;
                }
                Some(Ok(InputLine::Text(line))) => {
                    if let Some(end) = self.handle_line(line, shutdown).await {
                        break end;
                    }
                    self.write_prompt().await;
                }
                Some(Ok(InputLine::Overlong)) => {
                    warn!(session = self.id, "discarded over-long input line");
                    let limit = self.input.decoder().max_length();
                    self.report_error(&EvalError::exception(
                        "RangeError",
                        format!("input line exceeds {limit} bytes"),
                    ))
                    .await;
                    self.write_prompt().await;
                }
            }
        };

        self.finish(end).await;
        end
    }

    async fn handle_line(&mut self, line: String, shutdown: &CancellationToken) -> Option<SessionEnd> {
        let trimmed = line.trim();

        if let Some(directive) = parse_directive(trimmed) {
            return self.run_directive(directive).await;
        }

        if trimmed.is_empty() && self.pending.is_empty() {
            return None;
        }

        if let Err(err) = self.history.append(&line) {
            warn!(session = self.id, %err, "history append failed");
        }

        self.pending.push(line);
        let code = self.pending.join("\n");

        let ticket = match self.pipeline.submit(code, self.origin.clone()) {
            Ok(ticket) => ticket,
            Err(err) => {
                self.pending.clear();
                self.report_error(&EvalError::exception("Error", err.to_string()))
                    .await;
                return None;
            }
        };

        let completion = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Some(SessionEnd::HostShutdown),
            completion = ticket.completion() => completion,
        };

        match completion {
            Ok(Ok(value)) => {
                self.pending.clear();
                if value.is_some() || !self.options.ignore_undefined {
                    let rendered = render_value(value.as_ref(), self.options.colors());
                    self.output.write_line(&rendered).await;
                }
            }
            Ok(Err(err)) if err.is_recoverable() => {
                debug!(session = self.id, "statement incomplete, awaiting more input");
            }
            Ok(Err(err)) => {
                self.pending.clear();
                self.report_error(&err).await;
            }
            Err(err) => {
                self.pending.clear();
                self.report_error(&EvalError::exception("Error", err.to_string()))
                    .await;
            }
        }

        None
    }

    async fn run_directive(&mut self, directive: Directive) -> Option<SessionEnd> {
        match directive {
            Directive::Exit => return Some(SessionEnd::Exit),
            Directive::Reload => {
                info!(session = self.id, "reload requested from shell");
                return Some(SessionEnd::Reload);
            }
            Directive::Break => self.pending.clear(),
            Directive::History => {
                let lines = self.history.recall().to_vec();
                for line in lines {
                    self.output.write_line(&line).await;
                }
            }
            Directive::Help => self.output.write_line(HELP_TEXT).await,
            Directive::Unknown(word) => {
                self.output
                    .write_line(&format!("Invalid REPL keyword: .{word}"))
                    .await;
            }
        }
        None
    }

    async fn report_error(&mut self, err: &EvalError) {
        let rendered = render_error(err, self.options.colors());
        self.output.write_line(&rendered).await;
    }

    async fn write_prompt(&mut self) {
        if self.options.prompt.is_empty() {
            return;
        }
        let prompt = if self.pending.is_empty() {
            self.options.prompt.clone()
        } else {
            CONTINUATION_PROMPT.to_owned()
        };
        self.output.write(&prompt).await;
    }

    async fn finish(&mut self, end: SessionEnd) {
        match end {
            SessionEnd::Exit | SessionEnd::InputClosed => self.output.exit().await,
            SessionEnd::Reload | SessionEnd::HostShutdown => self.output.close().await,
        }
        self.history.close();
        debug!(session = self.id, ?end, "session finished");
    }
}

fn parse_directive(trimmed: &str) -> Option<Directive> {
    let rest = trimmed.strip_prefix('.')?;
    if !rest.chars().next().is_some_and(char::is_alphabetic) {
        return None;
    }
    let word = rest.split_whitespace().next().unwrap_or(rest);
    Some(match word {
        "exit" => Directive::Exit,
        "reload" => Directive::Reload,
        "break" => Directive::Break,
        "history" => Directive::History,
        "help" => Directive::Help,
        other => Directive::Unknown(other.to_owned()),
    })
}

/// Terminal reply of a one-shot connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OneShotReply {
    /// Evaluation succeeded; an undefined result serializes as `{}`.
    Result {
        /// The evaluation's value.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    /// Evaluation failed.
    Error {
        /// Error rendered as `Name: message`.
        error: String,
        /// Always `1`.
        code: i32,
    },
}

impl OneShotReply {
    /// Build the reply for a pipeline outcome.
    #[must_use]
    pub fn from_outcome(outcome: Result<Evaluation>) -> Self {
        match outcome {
            Ok(Ok(result)) => Self::Result { result },
            Ok(Err(err)) => Self::failure(err.to_string()),
            Err(err) => Self::failure(format!("Error: {err}")),
        }
    }

    fn failure(error: String) -> Self {
        Self::Error { error, code: 1 }
    }
}

/// Evaluate a one-shot request, write its reply, and close the connection.
///
/// No prompt and no exit banner are written: the client expects exactly one
/// JSON line.
pub async fn run_one_shot<W>(
    request: &EvaluateAndExit,
    output: &mut ShellOutput<W>,
    pipeline: &EvalPipeline,
    hooks: &HostHooks,
    shutdown: &CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    install_modules(pipeline, hooks);

    let origin = request
        .filename
        .clone()
        .unwrap_or_else(|| ONE_SHOT_ORIGIN.to_owned());

    let outcome = tokio::select! {
        biased;
        () = shutdown.cancelled() => {
            output.close().await;
            return;
        }
        outcome = pipeline.evaluate(request.command.clone(), origin) => outcome,
    };

    output
        .write_json_line(&OneShotReply::from_outcome(outcome))
        .await;
    output.close().await;
}

fn install_modules(pipeline: &EvalPipeline, hooks: &HostHooks) {
    let Some(installer) = hooks.module_installer.clone() else {
        return;
    };
    if let Err(err) = pipeline.schedule(move |context| installer.install(context)) {
        warn!(%err, "failed to install host modules");
    }
}
