//! Serialized evaluation queue.
//!
//! Every evaluation from every connection is sent to one worker task that
//! owns the shared [`EvalContext`]. The worker drains its queue strictly in
//! submission order and awaits each evaluation to completion before taking
//! the next, so two evaluations never interleave even when an evaluation
//! suspends.
//!
//! Each submission returns a [`Ticket`] whose completion resolves exactly
//! once: with the evaluation outcome, or with a "pipeline stopped" error if
//! the worker shut down first.

use std::borrow::Cow;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use super::{EvalContext, EvalError, Evaluation, Evaluator, HostHooks, SourceTransform};
use crate::{AppError, Result};

type ContextAccess = Box<dyn FnOnce(&mut EvalContext) + Send>;

enum Job {
    Evaluate {
        code: String,
        origin: String,
        done: oneshot::Sender<Evaluation>,
    },
    Access(ContextAccess),
}

/// Handle for submitting work to the evaluation worker.
///
/// Cheap to clone; all clones feed the same FIFO queue.
#[derive(Clone)]
pub struct EvalPipeline {
    jobs: mpsc::UnboundedSender<Job>,
}

/// Pending completion of one submitted evaluation.
#[must_use = "a ticket does nothing unless its completion is awaited"]
pub struct Ticket {
    origin: String,
    done: oneshot::Receiver<Evaluation>,
}

impl Ticket {
    /// Wait for the evaluation to finish.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pipeline` if the worker vanished without reporting
    /// an outcome.
    pub async fn completion(self) -> Result<Evaluation> {
        let Self { origin, done } = self;
        done.await
            .map_err(|_| AppError::Pipeline(format!("evaluation from {origin} was dropped")))
    }
}

impl EvalPipeline {
    /// Spawn the evaluation worker with a fresh shared context.
    ///
    /// Takes the source transform from `hooks`. The worker runs until
    /// `cancel` fires or every handle is dropped.
    #[must_use]
    pub fn spawn(
        evaluator: Arc<dyn Evaluator>,
        hooks: &HostHooks,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            evaluator,
            transform: hooks.source_transform.clone(),
            context: EvalContext::new(),
            jobs: rx,
        };
        let handle = tokio::spawn(worker.run(cancel).instrument(info_span!("eval_pipeline")));
        (Self { jobs: tx }, handle)
    }

    /// Queue `code` for evaluation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pipeline` if the worker has stopped.
    pub fn submit(&self, code: impl Into<String>, origin: impl Into<String>) -> Result<Ticket> {
        let origin = origin.into();
        let (done, rx) = oneshot::channel();
        self.jobs
            .send(Job::Evaluate {
                code: code.into(),
                origin: origin.clone(),
                done,
            })
            .map_err(|_| pipeline_closed())?;
        Ok(Ticket { origin, done: rx })
    }

    /// Queue `code` and wait for its outcome.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pipeline` if the worker has stopped.
    pub async fn evaluate(
        &self,
        code: impl Into<String>,
        origin: impl Into<String>,
    ) -> Result<Evaluation> {
        self.submit(code, origin)?.completion().await
    }

    /// Run `access` against the shared context, in queue order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pipeline` if the worker has stopped.
    pub async fn with_context<T, F>(&self, access: F) -> Result<T>
    where
        F: FnOnce(&mut EvalContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.jobs
            .send(Job::Access(Box::new(move |context| {
                let _ = tx.send(access(context));
            })))
            .map_err(|_| pipeline_closed())?;
        rx.await.map_err(|_| pipeline_closed())
    }

    /// Queue `access` against the shared context without waiting for it.
    ///
    /// It runs after everything already queued and before anything
    /// submitted afterwards.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Pipeline` if the worker has stopped.
    pub fn schedule<F>(&self, access: F) -> Result<()>
    where
        F: FnOnce(&mut EvalContext) + Send + 'static,
    {
        self.jobs
            .send(Job::Access(Box::new(access)))
            .map_err(|_| pipeline_closed())
    }

    /// Whether the worker has stopped accepting work.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

struct Worker {
    evaluator: Arc<dyn Evaluator>,
    transform: Option<Arc<dyn SourceTransform>>,
    context: EvalContext,
    jobs: mpsc::UnboundedReceiver<Job>,
}

impl Worker {
    async fn run(mut self, cancel: CancellationToken) {
        info!("evaluation pipeline started");

        loop {
            let job = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                job = self.jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            match job {
                Job::Access(access) => access(&mut self.context),
                Job::Evaluate { code, origin, done } => {
                    let outcome = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        outcome = evaluate_one(
                            self.evaluator.as_ref(),
                            self.transform.as_deref(),
                            &mut self.context,
                            &code,
                            &origin,
                        ) => Some(outcome),
                    };

                    let Some(outcome) = outcome else {
                        let _ = done.send(Err(stopped()));
                        break;
                    };

                    if done.send(outcome).is_err() {
                        debug!(origin, "evaluation finished after its submitter went away");
                    }
                }
            }
        }

        // Fail everything still queued so no submitter waits forever.
        self.jobs.close();
        while let Ok(job) = self.jobs.try_recv() {
            if let Job::Evaluate { done, .. } = job {
                let _ = done.send(Err(stopped()));
            }
        }

        info!("evaluation pipeline stopped");
    }
}

async fn evaluate_one(
    evaluator: &dyn Evaluator,
    transform: Option<&dyn SourceTransform>,
    context: &mut EvalContext,
    code: &str,
    origin: &str,
) -> Evaluation {
    let source: Cow<'_, str> = match transform.map(|t| t.transform(code, origin)) {
        Some(Ok(transformed)) => Cow::Owned(transformed),
        Some(Err(err)) => {
            debug!(origin, error = %err, "source transform failed, deferring to evaluator");
            Cow::Borrowed(code)
        }
        None => Cow::Borrowed(code),
    };

    let outcome = evaluator.evaluate(&source, origin, context).await;
    if let Ok(value) = &outcome {
        context.record_result(value);
    }
    outcome
}

fn stopped() -> EvalError {
    EvalError::exception("Error", "evaluation pipeline stopped")
}

fn pipeline_closed() -> AppError {
    AppError::Pipeline("evaluation pipeline is closed".into())
}
