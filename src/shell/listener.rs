//! Loopback listener that accepts attach connections.
//!
//! Each accepted socket gets its own task: the handshake header is read
//! under a deadline, the secret is checked, and the connection then becomes
//! either a one-shot evaluation or an interactive [`Session`]. Connection
//! tasks are tracked so shutdown can cancel them and wait for them to close
//! before the discovery record is disabled.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ShellConfig;
use crate::eval::pipeline::EvalPipeline;
use crate::eval::HostHooks;
use crate::shell::discovery;
use crate::shell::handshake::{FrameReader, HandshakeRequest};
use crate::shell::history::HistoryStore;
use crate::shell::output::ShellOutput;
use crate::shell::session::{run_one_shot, Session, SessionEnd};
use crate::{AppError, Result};

/// Why [`AttachListener::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The host cancelled the shell.
    Shutdown,
    /// A session asked the host to restart.
    Reload,
}

impl ShutdownReason {
    fn record_reason(self) -> &'static str {
        match self {
            Self::Shutdown => "shell shut down",
            Self::Reload => "reloading",
        }
    }
}

/// State shared by every connection task.
struct Shared {
    config: Arc<ShellConfig>,
    key: String,
    pipeline: EvalPipeline,
    hooks: HostHooks,
}

/// A bound, published attach listener.
pub struct AttachListener {
    listener: TcpListener,
    port: u16,
    shared: Arc<Shared>,
}

impl AttachListener {
    /// Bind an ephemeral loopback port and publish the discovery record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the socket cannot be bound, or
    /// `AppError::Discovery` if the record cannot be written.
    pub async fn bind(
        config: Arc<ShellConfig>,
        pipeline: EvalPipeline,
        hooks: HostHooks,
    ) -> Result<Self> {
        let addr = SocketAddr::new(config.bind_address, 0);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| AppError::Io(format!("failed to bind shell listener on {addr}: {err}")))?;
        let port = listener.local_addr()?.port();

        let key = Uuid::new_v4().to_string();
        discovery::publish(&config.shell_dir, port, &key)?;

        info!(port, "shell listening");

        Ok(Self {
            listener,
            port,
            shared: Arc::new(Shared {
                config,
                key,
                pipeline,
                hooks,
            }),
        })
    }

    /// Port the listener is bound to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Secret clients must present in the handshake.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// Accept connections until `shutdown` fires or a session requests a
    /// reload. Open sessions are closed without the exit banner and the
    /// discovery record is disabled before returning.
    pub async fn run(self, shutdown: CancellationToken) -> ShutdownReason {
        let Self {
            listener,
            port,
            shared,
        } = self;

        let tracker = TaskTracker::new();
        let sessions = CancellationToken::new();
        let reload = CancellationToken::new();
        let mut next_id: u64 = 0;

        let reason = async {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break ShutdownReason::Shutdown,
                    () = reload.cancelled() => break ShutdownReason::Reload,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            next_id += 1;
                            let span = info_span!("shell_conn", id = next_id, peer = %peer);
                            tracker.spawn(
                                handle_connection(
                                    stream,
                                    next_id,
                                    Arc::clone(&shared),
                                    sessions.clone(),
                                    reload.clone(),
                                )
                                .instrument(span),
                            );
                        }
                        Err(err) => warn!(%err, "shell accept failed"),
                    },
                }
            }
        }
        .instrument(info_span!("shell_listener", port))
        .await;

        drop(listener);
        sessions.cancel();
        tracker.close();
        tracker.wait().await;

        discovery::disable(&shared.config.shell_dir, reason.record_reason());
        info!(?reason, "shell listener stopped");
        reason
    }
}

/// Bind and serve once `ready` resolves.
///
/// Lets the host delay exposing the shell until its own startup has
/// finished. Returns [`ShutdownReason::Shutdown`] without binding if
/// `shutdown` fires first.
///
/// # Errors
///
/// Returns the error from [`AttachListener::bind`].
pub async fn serve_when_ready<F>(
    ready: F,
    config: Arc<ShellConfig>,
    pipeline: EvalPipeline,
    hooks: HostHooks,
    shutdown: CancellationToken,
) -> Result<ShutdownReason>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        biased;
        () = shutdown.cancelled() => return Ok(ShutdownReason::Shutdown),
        () = ready => {}
    }

    let listener = AttachListener::bind(config, pipeline, hooks).await?;
    Ok(listener.run(shutdown).await)
}

async fn handle_connection(
    stream: TcpStream,
    id: u64,
    shared: Arc<Shared>,
    sessions: CancellationToken,
    reload: CancellationToken,
) {
    let (reader, writer) = stream.into_split();
    let mut output = ShellOutput::new(writer);
    let frames = FrameReader::new(reader, shared.config.max_header_bytes);

    let split = tokio::select! {
        biased;
        () = sessions.cancelled() => {
            output.close().await;
            return;
        }
        split = tokio::time::timeout(shared.config.handshake_timeout(), frames.split_header()) => split,
    };

    let (header, payload) = match split {
        Ok(Ok(split)) => split,
        Ok(Err(err)) => {
            warn!(%err, "shell handshake failed");
            output.close().await;
            return;
        }
        Err(_) => {
            debug!("shell handshake timed out");
            output.exit().await;
            return;
        }
    };

    let request = match HandshakeRequest::from_header(header) {
        Ok(request) => request,
        Err(err) => {
            warn!(%err, "shell handshake rejected");
            output.close().await;
            return;
        }
    };

    if let Err(err) = request.authorize(&shared.key) {
        debug!(%err, "shell connection refused");
        output.exit().await;
        return;
    }

    let options = request.into_options(&shared.config.session);

    if let Some(one_shot) = options.evaluate_and_exit.clone() {
        debug!("one-shot evaluation");
        run_one_shot(&one_shot, &mut output, &shared.pipeline, &shared.hooks, &sessions).await;
        return;
    }

    let history = match HistoryStore::open(shared.config.history_path()) {
        Ok(history) => history,
        Err(err) => {
            warn!(%err, "history unavailable, continuing without it");
            HistoryStore::in_memory()
        }
    };

    let session = Session::start(
        id,
        options,
        payload,
        output,
        shared.pipeline.clone(),
        history,
        &shared.hooks,
    );

    if session.run(&sessions).await == SessionEnd::Reload {
        reload.cancel();
    }
}
