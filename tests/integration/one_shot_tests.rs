//! `evaluateAndExit` connections.

use std::sync::Arc;

use attach_shell::eval::{EvalContext, HostHooks, ModuleInstaller, SourceTransform};
use serde_json::json;

use super::test_helpers::{read_until_closed, TestShell};

struct Version;

impl ModuleInstaller for Version {
    fn install(&self, context: &mut EvalContext) {
        context.register_module("app", json!({"version": "1.2.3"}));
    }
}

/// Accepts `let!` as shorthand for `let`.
struct Shorthand;

impl SourceTransform for Shorthand {
    fn transform(&self, source: &str, _origin: &str) -> Result<String, String> {
        match source.strip_prefix("let! ") {
            Some(rest) => Ok(format!("let {rest}")),
            None => Err("nothing to rewrite".into()),
        }
    }
}

#[tokio::test]
async fn success_replies_with_result() {
    let mut shell = TestShell::start().await;

    assert_eq!(shell.eval("1+1").await, "{\"result\":2}\n");
    shell.stop().await;
}

#[tokio::test]
async fn thrown_error_replies_with_error_and_code() {
    let mut shell = TestShell::start().await;

    assert_eq!(
        shell.eval("throw new Error('x')").await,
        "{\"error\":\"Error: x\",\"code\":1}\n"
    );
    shell.stop().await;
}

#[tokio::test]
async fn undefined_result_is_an_empty_object() {
    let mut shell = TestShell::start().await;

    assert_eq!(shell.eval("let quiet = 1").await, "{}\n");
    shell.stop().await;
}

#[tokio::test]
async fn incomplete_command_is_reported_not_buffered() {
    let mut shell = TestShell::start().await;

    assert_eq!(
        shell.eval("1 +").await,
        "{\"error\":\"SyntaxError: Unexpected end of input\",\"code\":1}\n"
    );
    shell.stop().await;
}

#[tokio::test]
async fn no_prompt_text_precedes_reply() {
    let mut shell = TestShell::start().await;

    let header = json!({
        "key": shell.key,
        "prompt": "custom> ",
        "evaluateAndExit": {"command": "'text'", "filename": "answer.calc"}
    });
    let mut stream = shell.connect(&header, "").await;

    assert_eq!(read_until_closed(&mut stream).await, "{\"result\":\"text\"}\n");
    shell.stop().await;
}

#[tokio::test]
async fn one_shot_sees_host_modules() {
    let hooks = HostHooks::none().with_module_installer(Arc::new(Version));
    let mut shell = TestShell::start_with(hooks, |_| {}).await;

    assert_eq!(
        shell.eval("require('app').version").await,
        "{\"result\":\"1.2.3\"}\n"
    );
    shell.stop().await;
}

#[tokio::test]
async fn one_shot_results_update_shared_context() {
    let mut shell = TestShell::start().await;

    shell.eval("total = 40").await;
    assert_eq!(shell.eval("total + 2").await, "{\"result\":42}\n");
    assert_eq!(shell.eval("_").await, "{\"result\":42}\n");
    shell.stop().await;
}

#[tokio::test]
async fn source_transform_hook_rewrites_submissions() {
    let hooks = HostHooks::none().with_source_transform(Arc::new(Shorthand));
    let mut shell = TestShell::start_with(hooks, |_| {}).await;

    assert_eq!(shell.eval("let! n = 4").await, "{}\n");
    assert_eq!(shell.eval("n * n").await, "{\"result\":16}\n");
    shell.stop().await;
}
