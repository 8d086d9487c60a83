//! Host shutdown, disable-while-reconnecting, and delayed startup.

use std::sync::Arc;
use std::time::Duration;

use attach_shell::config::ShellConfig;
use attach_shell::eval::calc::CalcEvaluator;
use attach_shell::eval::pipeline::EvalPipeline;
use attach_shell::eval::HostHooks;
use attach_shell::shell::discovery::DiscoveryRecord;
use attach_shell::shell::listener::{serve_when_ready, ShutdownReason};
use tokio_util::sync::CancellationToken;

use super::test_helpers::{read_exact_text, read_until_closed, TestShell};

#[tokio::test]
async fn shutdown_closes_sessions_without_banner() {
    let mut shell = TestShell::start().await;
    let dir = shell.config.shell_dir.clone();

    let mut stream = shell.attach("").await;
    assert_eq!(read_exact_text(&mut stream, 2).await, "> ");

    assert_eq!(shell.stop().await, ShutdownReason::Shutdown);
    assert_eq!(read_until_closed(&mut stream).await, "");
    assert_eq!(
        DiscoveryRecord::load(&dir),
        DiscoveryRecord::Disabled {
            reason: "shell shut down".into()
        }
    );
}

#[tokio::test]
async fn reader_after_disable_does_not_connect() {
    let mut shell = TestShell::start().await;
    let dir = shell.config.shell_dir.clone();

    let before = DiscoveryRecord::load(&dir);
    assert!(before.is_enabled());

    shell.stop().await;

    let after = DiscoveryRecord::load(&dir);
    assert!(!after.is_enabled());
    if let DiscoveryRecord::Enabled { port, .. } = before {
        let refused = tokio::net::TcpStream::connect(("127.0.0.1", port)).await;
        assert!(refused.is_err(), "listener socket is released after shutdown");
    }
}

#[tokio::test]
async fn listening_waits_for_readiness() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(ShellConfig::new(dir.path().join("shell")));
    let cancel = CancellationToken::new();
    let (pipeline, _worker) = EvalPipeline::spawn(Arc::new(CalcEvaluator::new()), &HostHooks::none(), cancel.clone());
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown = CancellationToken::new();

    let serving = tokio::spawn(serve_when_ready(
        async move {
            let _ = ready_rx.await;
        },
        Arc::clone(&config),
        pipeline,
        HostHooks::none(),
        shutdown.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!config.discovery_path().exists(), "nothing published before ready");

    ready_tx.send(()).expect("signal ready");
    let mut published = false;
    for _ in 0..50 {
        if DiscoveryRecord::load(&config.shell_dir).is_enabled() {
            published = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(published, "record published once ready");

    shutdown.cancel();
    let reason = serving.await.expect("serve task").expect("serve result");
    assert_eq!(reason, ShutdownReason::Shutdown);
    cancel.cancel();
}

#[tokio::test]
async fn shutdown_before_ready_never_binds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Arc::new(ShellConfig::new(dir.path().join("shell")));
    let cancel = CancellationToken::new();
    let (pipeline, _worker) = EvalPipeline::spawn(Arc::new(CalcEvaluator::new()), &HostHooks::none(), cancel.clone());
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let reason = serve_when_ready(
        std::future::pending::<()>(),
        Arc::clone(&config),
        pipeline,
        HostHooks::none(),
        shutdown,
    )
    .await
    .expect("serve result");

    assert_eq!(reason, ShutdownReason::Shutdown);
    assert!(!config.discovery_path().exists());
    cancel.cancel();
}
