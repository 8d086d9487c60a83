//! Evaluation seam between the shell and the host's expression evaluator.
//!
//! The shell never interprets submitted code itself. Everything it needs from
//! the host is expressed as traits:
//!
//! - [`Evaluator`] turns source text into a value against the shared
//!   [`EvalContext`].
//! - [`SourceTransform`] rewrites submitted source before evaluation.
//! - [`ModuleInstaller`] exposes host modules to evaluated code.
//!
//! All evaluation is funnelled through [`pipeline::EvalPipeline`], which owns
//! the single process-wide context.

pub mod calc;
pub mod pipeline;

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

/// Result of one evaluation. `Ok(None)` is a successful evaluation that
/// produced no value.
pub type Evaluation = std::result::Result<Option<Value>, EvalError>;

/// Failure raised while evaluating submitted code.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Input ended before a complete statement; more lines may fix it.
    Incomplete(String),
    /// An error object was thrown.
    Exception {
        /// Error class name, e.g. `TypeError`.
        name: String,
        /// Error message.
        message: String,
    },
    /// A non-error value was thrown.
    Thrown(Value),
}

impl EvalError {
    /// Build an [`EvalError::Exception`].
    #[must_use]
    pub fn exception(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exception {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Whether the submitting front end should keep buffering input instead
    /// of reporting this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Incomplete(_))
    }

    /// Convert a thrown value into an error, recognising `{name, message}`
    /// error objects.
    #[must_use]
    pub fn from_thrown(value: Value) -> Self {
        if let Value::Object(map) = &value {
            if let (Some(Value::String(name)), Some(Value::String(message))) =
                (map.get("name"), map.get("message"))
            {
                return Self::exception(name.clone(), message.clone());
            }
        }
        Self::Thrown(value)
    }
}

impl Display for EvalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incomplete(msg) => write!(f, "SyntaxError: {msg}"),
            Self::Exception { name, message } => write!(f, "{name}: {message}"),
            Self::Thrown(Value::String(text)) => f.write_str(text),
            Self::Thrown(value) => write!(f, "{value}"),
        }
    }
}

impl std::error::Error for EvalError {}

/// The shared namespace every evaluation runs against.
///
/// Bindings and the last-value slot persist across lines and across
/// reconnecting clients; there is exactly one instance per pipeline.
#[derive(Debug, Default)]
pub struct EvalContext {
    bindings: HashMap<String, Option<Value>>,
    modules: HashMap<String, Value>,
    last_value: Option<Value>,
    last_value_pinned: bool,
}

impl EvalContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a binding. The outer `Option` is "is it defined", the inner
    /// one is the (possibly undefined) value.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Option<Value>> {
        self.bindings.get(name).cloned()
    }

    /// Create or overwrite a binding.
    pub fn bind(&mut self, name: impl Into<String>, value: Option<Value>) {
        self.bindings.insert(name.into(), value);
    }

    /// Names of all bindings, sorted.
    #[must_use]
    pub fn binding_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.keys().cloned().collect();
        names.sort();
        names
    }

    /// Value of the most recent successful evaluation.
    #[must_use]
    pub fn last_value(&self) -> Option<&Value> {
        self.last_value.as_ref()
    }

    /// Assign the last-value slot from evaluated code.
    ///
    /// Once assigned explicitly the slot is pinned: later evaluation results
    /// no longer overwrite it.
    pub fn set_last_value(&mut self, value: Option<Value>) {
        self.last_value = value;
        self.last_value_pinned = true;
    }

    /// Whether evaluated code has taken over the last-value slot.
    #[must_use]
    pub fn is_last_value_pinned(&self) -> bool {
        self.last_value_pinned
    }

    /// Record the result of a successful evaluation in the last-value slot.
    pub fn record_result(&mut self, value: &Option<Value>) {
        if !self.last_value_pinned {
            self.last_value.clone_from(value);
        }
    }

    /// Register a host module under `name` for `require`.
    pub fn register_module(&mut self, name: impl Into<String>, exports: Value) {
        self.modules.insert(name.into(), exports);
    }

    /// Exports of a registered host module.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<&Value> {
        self.modules.get(name)
    }
}

/// Host-provided expression evaluator.
///
/// Evaluation may suspend (for example awaiting I/O performed against the
/// context); the pipeline guarantees no other evaluation starts until the
/// returned future completes.
pub trait Evaluator: Send + Sync {
    /// Evaluate `code` submitted from `origin` against `context`.
    fn evaluate<'a>(
        &'a self,
        code: &'a str,
        origin: &'a str,
        context: &'a mut EvalContext,
    ) -> Pin<Box<dyn Future<Output = Evaluation> + Send + 'a>>;
}

/// Rewrites submitted source before it reaches the evaluator.
pub trait SourceTransform: Send + Sync {
    /// Transform `source`.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure; the pipeline then evaluates the
    /// untransformed source and lets the evaluator judge recoverability.
    fn transform(&self, source: &str, origin: &str) -> std::result::Result<String, String>;
}

/// Exposes host modules to evaluated code.
pub trait ModuleInstaller: Send + Sync {
    /// Register modules on `context`. Called once per session, so it must be
    /// idempotent.
    fn install(&self, context: &mut EvalContext);
}

/// Optional host collaborators injected into the shell.
#[derive(Clone, Default)]
pub struct HostHooks {
    /// Applied to every submission before evaluation.
    pub source_transform: Option<Arc<dyn SourceTransform>>,
    /// Applied to the shared context when a session starts.
    pub module_installer: Option<Arc<dyn ModuleInstaller>>,
}

impl HostHooks {
    /// Hooks with no collaborators installed.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Attach a source transform.
    #[must_use]
    pub fn with_source_transform(mut self, transform: Arc<dyn SourceTransform>) -> Self {
        self.source_transform = Some(transform);
        self
    }

    /// Attach a module installer.
    #[must_use]
    pub fn with_module_installer(mut self, installer: Arc<dyn ModuleInstaller>) -> Self {
        self.module_installer = Some(installer);
        self
    }
}
