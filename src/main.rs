#![forbid(unsafe_code)]

//! `attach-shell` — demonstration host for the attach shell.
//!
//! Loads configuration, starts the evaluation pipeline with the bundled
//! `calc` evaluator, and serves attach connections until a signal arrives or
//! a client requests `.reload`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use attach_shell::config::ShellConfig;
use attach_shell::eval::calc::CalcEvaluator;
use attach_shell::eval::pipeline::EvalPipeline;
use attach_shell::eval::{EvalContext, HostHooks, ModuleInstaller};
use attach_shell::shell::listener::{serve_when_ready, ShutdownReason};
use attach_shell::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "attach-shell", about = "Attachable evaluation shell host", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the discovery record and history log.
    #[arg(long)]
    shell_dir: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Delay before the shell starts listening, in milliseconds.
    #[arg(long, default_value_t = 0)]
    ready_delay_ms: u64,
}

/// Exposes `require('process')` to evaluated code.
struct ProcessModule {
    shell_dir: PathBuf,
}

impl ModuleInstaller for ProcessModule {
    fn install(&self, context: &mut EvalContext) {
        context.register_module(
            "process",
            json!({
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "shellDir": self.shell_dir.display().to_string(),
            }),
        );
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("attach-shell bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ShellConfig::load_from_path(path)?,
        None => ShellConfig::new(default_shell_dir()),
    };
    if let Some(dir) = args.shell_dir {
        config.shell_dir = dir;
    }
    config.validate()?;
    let config = Arc::new(config);
    info!(shell_dir = %config.shell_dir.display(), "configuration loaded");

    let ct = CancellationToken::new();
    let hooks = HostHooks::none().with_module_installer(Arc::new(ProcessModule {
        shell_dir: config.shell_dir.clone(),
    }));
    let (pipeline, pipeline_handle) = EvalPipeline::spawn(
        Arc::new(CalcEvaluator::new()),
        &hooks,
        ct.clone(),
    );

    let signal_ct = ct.clone();
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    let ready = tokio::time::sleep(Duration::from_millis(args.ready_delay_ms));
    let outcome = serve_when_ready(ready, Arc::clone(&config), pipeline, hooks, ct.clone()).await;

    signal_handle.abort();
    ct.cancel();
    if let Err(err) = pipeline_handle.await {
        error!(%err, "evaluation pipeline task failed");
    }

    match outcome? {
        ShutdownReason::Shutdown => info!("attach-shell shut down"),
        ShutdownReason::Reload => info!("attach-shell exiting for reload"),
    }

    Ok(())
}

fn default_shell_dir() -> PathBuf {
    std::env::temp_dir().join("attach-shell")
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_writer(std::io::stderr).with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
