//! Test steps and hooks
//!
//! The caller picks the step shape when registering it: a plain function, a
//! function returning a future, or a function handed a [`Done`] completion
//! handle. Errors and panics inside a step are turned into a [`StepFailure`].

use crate::data::DataError;
use crate::distributed::{BarrierError, EventError, StoreError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::oneshot;

/// Outcome of one step invocation
pub type StepResult = anyhow::Result<()>;

/// Frames from this module onward belong to the runner, not to the script
const RUNNER_FRAME: &str = "fleetsync::suite::";

/// A test step or hook
pub enum Step {
    /// Complete on return
    Sync(Box<dyn FnMut() -> StepResult + Send>),
    /// Complete when the returned future settles
    Async(Box<dyn FnMut() -> BoxFuture<'static, StepResult> + Send>),
    /// Complete when the [`Done`] handle is invoked
    Callback(Box<dyn FnMut(Done) + Send>),
}

impl Step {
    pub fn sync<F>(f: F) -> Self
    where
        F: FnMut() -> StepResult + Send + 'static,
    {
        Step::Sync(Box::new(f))
    }

    pub fn future<F, Fut>(mut f: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        Step::Async(Box::new(move || f().boxed()))
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: FnMut(Done) + Send + 'static,
    {
        Step::Callback(Box::new(f))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::Sync(_) => "sync",
            Step::Async(_) => "async",
            Step::Callback(_) => "callback",
        }
    }

    /// Invoke the step and wait for it to settle
    pub(crate) async fn run(&mut self) -> Result<(), StepFailure> {
        match self {
            Step::Sync(f) => match panic::catch_unwind(AssertUnwindSafe(|| f())) {
                Ok(result) => result.map_err(|e| StepFailure::from_error(&e)),
                Err(payload) => Err(StepFailure::from_panic(payload)),
            },
            Step::Async(f) => {
                let fut = panic::catch_unwind(AssertUnwindSafe(|| f()))
                    .map_err(StepFailure::from_panic)?;
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(result) => result.map_err(|e| StepFailure::from_error(&e)),
                    Err(payload) => Err(StepFailure::from_panic(payload)),
                }
            }
            Step::Callback(f) => {
                let (tx, rx) = oneshot::channel();
                panic::catch_unwind(AssertUnwindSafe(|| f(Done(tx))))
                    .map_err(StepFailure::from_panic)?;
                match rx.await {
                    Ok(result) => result.map_err(|e| StepFailure::from_error(&e)),
                    Err(_) => Err(StepFailure {
                        error_type: "Error".to_string(),
                        message: "completion callback dropped".to_string(),
                        trace: None,
                    }),
                }
            }
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Step::{}", self.kind())
    }
}

/// Completion handle for callback-style steps
///
/// Dropping the handle without calling it fails the step.
#[derive(Debug)]
pub struct Done(oneshot::Sender<StepResult>);

impl Done {
    pub fn ok(self) {
        self.finish(Ok(()));
    }

    pub fn fail(self, err: impl Into<anyhow::Error>) {
        self.finish(Err(err.into()));
    }

    pub fn finish(self, result: StepResult) {
        // The runner stops listening only when it is itself being dropped
        let _ = self.0.send(result);
    }
}

/// Why a step failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub error_type: String,
    pub message: String,
    pub trace: Option<String>,
}

impl StepFailure {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            error_type: error_type(err).to_string(),
            message: err.to_string(),
            trace: Some(truncate_trace(&format!("{:?}", err))),
        }
    }

    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "step panicked".to_string()
        };

        Self {
            error_type: "panic".to_string(),
            message,
            trace: None,
        }
    }
}

fn error_type(err: &anyhow::Error) -> &'static str {
    if err.downcast_ref::<BarrierError>().is_some() {
        "BarrierError"
    } else if err.downcast_ref::<DataError>().is_some() {
        "DataError"
    } else if err.downcast_ref::<StoreError>().is_some() {
        "StoreError"
    } else if err.downcast_ref::<EventError>().is_some() {
        "EventError"
    } else {
        "Error"
    }
}

/// Cut a rendered error at the first runner frame
pub fn truncate_trace(trace: &str) -> String {
    let kept: Vec<&str> = trace
        .lines()
        .take_while(|line| !line.contains(RUNNER_FRAME))
        .collect();
    kept.join("\n").trim_end().to_string()
}
