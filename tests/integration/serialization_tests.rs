//! Evaluations from different connections never interleave.

use std::time::Duration;

use super::test_helpers::{read_until_closed, TestShell};

#[tokio::test]
async fn second_connection_waits_for_first_evaluation() {
    let mut shell = TestShell::start().await;

    let (slow, fast) = tokio::join!(shell.eval("sleep(200); marker = 'first'"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shell.eval("marker").await
    });

    assert_eq!(slow, "{\"result\":\"first\"}\n");
    assert_eq!(fast, "{\"result\":\"first\"}\n");
    shell.stop().await;
}

#[tokio::test]
async fn interactive_and_one_shot_share_one_queue() {
    let mut shell = TestShell::start().await;

    let mut interactive = shell.attach("sleep(150); step = 1\nstep = step + 1\n.exit\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let observed = shell.eval("step * 10").await;

    assert_eq!(observed, "{\"result\":10}\n");
    assert_eq!(
        read_until_closed(&mut interactive).await,
        "> 1\n> 2\n> Shell exiting...\n"
    );
    shell.stop().await;
}
