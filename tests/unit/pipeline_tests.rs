//! Serialized evaluation pipeline: ordering, shared context, hooks, shutdown.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use attach_shell::eval::calc::CalcEvaluator;
use attach_shell::eval::pipeline::EvalPipeline;
use attach_shell::eval::{EvalContext, EvalError, Evaluation, Evaluator, HostHooks, SourceTransform};
use attach_shell::AppError;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Logs when each evaluation starts and ends, suspending in between.
#[derive(Default)]
struct Recording {
    log: Arc<Mutex<Vec<String>>>,
}

impl Evaluator for Recording {
    fn evaluate<'a>(
        &'a self,
        code: &'a str,
        origin: &'a str,
        _context: &'a mut EvalContext,
    ) -> Pin<Box<dyn Future<Output = Evaluation> + Send + 'a>> {
        Box::pin(async move {
            self.log.lock().unwrap().push(format!("start {code} from {origin}"));
            tokio::time::sleep(Duration::from_millis(15)).await;
            self.log.lock().unwrap().push(format!("end {code}"));
            Ok(Some(json!(code)))
        })
    }
}

struct Rewrite;

impl SourceTransform for Rewrite {
    fn transform(&self, source: &str, _origin: &str) -> Result<String, String> {
        Ok(source.replace(" plus ", " + "))
    }
}

struct Broken;

impl SourceTransform for Broken {
    fn transform(&self, _source: &str, _origin: &str) -> Result<String, String> {
        Err("transform exploded".into())
    }
}

fn calc_pipeline(
    hooks: &HostHooks,
) -> (EvalPipeline, CancellationToken, tokio::task::JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let (pipeline, handle) = EvalPipeline::spawn(Arc::new(CalcEvaluator::new()), hooks, cancel.clone());
    (pipeline, cancel, handle)
}

#[tokio::test]
async fn evaluations_run_one_at_a_time_in_submission_order() {
    let evaluator = Recording::default();
    let log = Arc::clone(&evaluator.log);
    let cancel = CancellationToken::new();
    let (pipeline, _handle) = EvalPipeline::spawn(Arc::new(evaluator), &HostHooks::none(), cancel.clone());

    let first = pipeline.submit("a", "shell-1").expect("submit a");
    let second = pipeline.clone().submit("b", "shell-2").expect("submit b");
    let third = pipeline.submit("c", "shell-1").expect("submit c");

    let (c, b, a) = tokio::join!(third.completion(), second.completion(), first.completion());

    assert_eq!(a.expect("a completes"), Ok(Some(json!("a"))));
    assert_eq!(b.expect("b completes"), Ok(Some(json!("b"))));
    assert_eq!(c.expect("c completes"), Ok(Some(json!("c"))));
    assert_eq!(
        *log.lock().unwrap(),
        [
            "start a from shell-1",
            "end a",
            "start b from shell-2",
            "end b",
            "start c from shell-1",
            "end c",
        ]
    );
    cancel.cancel();
}

#[tokio::test]
async fn bindings_persist_across_submissions() {
    let (pipeline, cancel, _handle) = calc_pipeline(&HostHooks::none());

    pipeline.evaluate("let x = 20", "shell-1").await.expect("let");
    let result = pipeline.evaluate("x + 1", "shell-2").await.expect("read");

    assert_eq!(result, Ok(Some(json!(21))));
    cancel.cancel();
}

#[tokio::test]
async fn last_value_tracks_successful_results() {
    let (pipeline, cancel, _handle) = calc_pipeline(&HostHooks::none());

    pipeline.evaluate("1 + 1", "t").await.expect("eval");
    let last = pipeline
        .with_context(|context| context.last_value().cloned())
        .await
        .expect("context access");
    assert_eq!(last, Some(json!(2)));

    let result = pipeline.evaluate("_ * 3", "t").await.expect("eval");
    assert_eq!(result, Ok(Some(json!(6))));
    cancel.cancel();
}

#[tokio::test]
async fn failed_evaluation_leaves_last_value_alone() {
    let (pipeline, cancel, _handle) = calc_pipeline(&HostHooks::none());

    pipeline.evaluate("7", "t").await.expect("eval");
    let failed = pipeline.evaluate("missing", "t").await.expect("eval");
    let last = pipeline
        .with_context(|context| context.last_value().cloned())
        .await
        .expect("context access");

    assert_eq!(
        failed,
        Err(EvalError::exception("ReferenceError", "missing is not defined"))
    );
    assert_eq!(last, Some(json!(7)));
    cancel.cancel();
}

#[tokio::test]
async fn assigning_last_value_pins_it() {
    let (pipeline, cancel, _handle) = calc_pipeline(&HostHooks::none());

    pipeline.evaluate("_ = 10", "t").await.expect("assign");
    pipeline.evaluate("5", "t").await.expect("eval");
    let (last, pinned) = pipeline
        .with_context(|context| (context.last_value().cloned(), context.is_last_value_pinned()))
        .await
        .expect("context access");

    assert_eq!(last, Some(json!(10)));
    assert!(pinned);
    cancel.cancel();
}

#[tokio::test]
async fn source_transform_runs_before_evaluation() {
    let (pipeline, cancel, _handle) = calc_pipeline(&HostHooks::none().with_source_transform(Arc::new(Rewrite)));

    let result = pipeline.evaluate("1 plus 2", "t").await.expect("eval");

    assert_eq!(result, Ok(Some(json!(3))));
    cancel.cancel();
}

#[tokio::test]
async fn failed_transform_defers_to_evaluator() {
    let (pipeline, cancel, _handle) = calc_pipeline(&HostHooks::none().with_source_transform(Arc::new(Broken)));

    let complete = pipeline.evaluate("4 * 2", "t").await.expect("eval");
    let partial = pipeline.evaluate("4 *", "t").await.expect("eval");

    assert_eq!(complete, Ok(Some(json!(8))));
    assert!(partial.expect_err("incomplete").is_recoverable());
    cancel.cancel();
}

#[tokio::test]
async fn cancel_fails_running_and_queued_evaluations() {
    let (pipeline, cancel, handle) = calc_pipeline(&HostHooks::none());

    let running = pipeline.submit("sleep(5000); 1", "t").expect("submit");
    let queued = pipeline.submit("2", "t").expect("submit");
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let stopped = Err(EvalError::exception("Error", "evaluation pipeline stopped"));
    assert_eq!(running.completion().await.expect("completion"), stopped);
    assert_eq!(queued.completion().await.expect("completion"), stopped);

    handle.await.expect("worker exits");
    assert!(pipeline.is_closed());
    assert!(matches!(
        pipeline.submit("3", "t").err(),
        Some(AppError::Pipeline(_))
    ));
}

#[tokio::test]
async fn context_access_is_ordered_with_evaluations() {
    let (pipeline, cancel, _handle) = calc_pipeline(&HostHooks::none());

    let ticket = pipeline.submit("let y = 3", "t").expect("submit");
    let names = pipeline
        .with_context(|context| context.binding_names())
        .await
        .expect("context access");

    assert_eq!(names, ["y"]);
    assert_eq!(ticket.completion().await.expect("completion"), Ok(None));
    cancel.cancel();
}

#[tokio::test]
async fn scheduled_access_runs_in_queue_order_without_waiting() {
    let (pipeline, cancel, _handle) = calc_pipeline(&HostHooks::none());

    let running = pipeline.submit("sleep(100); 1", "t").expect("submit");
    pipeline
        .schedule(|context| context.register_module("late", json!({"ok": true})))
        .expect("schedule returns while the evaluation is still running");
    let after = pipeline.evaluate("require('late').ok", "t").await.expect("eval");

    assert_eq!(running.completion().await.expect("first"), Ok(Some(json!(1))));
    assert_eq!(after, Ok(Some(json!(true))));
    cancel.cancel();
}
