//! MultiStepAction - ordered steps with a sequential execution driver

use std::fmt;

use futures::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{ActionError, ExecuteError};
use super::step::Step;

/// Future returned by a step executor.
pub type StepFuture<'a, E> = BoxFuture<'a, Result<(), E>>;

/// Binds step identifiers to executable work.
///
/// `supports` must agree with `execute`: every identifier reported as supported
/// must yield a future.
pub trait StepExecutor {
    type Error: fmt::Display;

    /// Whether this executor knows how to run the step.
    fn supports(&self, identifier: &str) -> bool;

    /// Start the work for `identifier`, or `None` if unsupported.
    fn execute(&mut self, identifier: &str) -> Option<StepFuture<'_, Self::Error>>;

    /// Called after a step completes or fails, with the updated step list.
    fn step_settled<'a>(&'a mut self, _steps: &'a [Step]) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Ordered, fixed-length sequence of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiStepAction {
    pub(crate) steps: Vec<Step>,
}

impl MultiStepAction {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, identifier: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.identifier() == identifier)
    }

    pub fn is_active(&self) -> bool {
        self.steps.iter().any(Step::is_active)
    }

    pub fn is_completed(&self) -> bool {
        self.steps.iter().all(Step::is_completed)
    }

    pub fn is_failed(&self) -> bool {
        self.steps.iter().any(Step::is_failed)
    }

    pub fn is_done(&self) -> bool {
        !self.is_active() && (self.is_failed() || self.is_completed())
    }

    /// Message of the first failed step in list order.
    pub fn error_message(&self) -> Option<&str> {
        self.steps.iter().find_map(Step::error_message)
    }

    /// Run every step that is not yet completed, one after another.
    ///
    /// Completed steps are skipped and need no executor. The first failing
    /// step records its message and stops the run; its error is returned as
    /// [`ExecuteError::Step`]. The executor sees every settled step through
    /// [`StepExecutor::step_settled`] before the run moves on.
    pub async fn execute_steps<X>(
        &mut self,
        executor: &mut X,
    ) -> Result<(), ExecuteError<X::Error>>
    where
        X: StepExecutor,
    {
        if self.is_failed() {
            return Err(ActionError::AlreadyFailed.into());
        }
        if self.is_active() {
            return Err(ActionError::AlreadyActive.into());
        }

        let remaining: Vec<usize> = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_completed())
            .map(|(i, _)| i)
            .collect();

        let missing: Vec<String> = remaining
            .iter()
            .map(|&i| self.steps[i].identifier())
            .filter(|id| !executor.supports(id))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(ActionError::MissingExecutors(missing).into());
        }

        for index in remaining {
            let identifier = self.steps[index].identifier().to_string();
            let Some(work) = executor.execute(&identifier) else {
                return Err(ActionError::MissingExecutors(vec![identifier]).into());
            };

            let mut guard = ActiveStep::activate(&mut self.steps[index])?;
            debug!(step = %identifier, "Step started");

            let outcome = work.await;
            match &outcome {
                Ok(()) => {
                    guard.step.complete().map_err(ActionError::from)?;
                    debug!(step = %identifier, "Step completed");
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(step = %identifier, error = %message, "Step failed");
                    guard
                        .step
                        .set_error_message(message)
                        .map_err(ActionError::from)?;
                }
            }
            drop(guard);
            executor.step_settled(&self.steps).await;
            outcome.map_err(ExecuteError::Step)?;
        }

        Ok(())
    }
}

/// Keeps a step active for the lifetime of the guard.
///
/// Deactivation happens on drop, so it also runs when the step's future is
/// abandoned mid-flight.
struct ActiveStep<'a> {
    step: &'a mut Step,
}

impl<'a> ActiveStep<'a> {
    fn activate(step: &'a mut Step) -> Result<Self, ActionError> {
        step.activate()?;
        Ok(Self { step })
    }
}

impl Drop for ActiveStep<'_> {
    fn drop(&mut self) {
        if self.step.is_active() {
            let _ = self.step.deactivate();
        }
    }
}

type Method<E> = Box<dyn FnMut() -> StepFuture<'static, E> + Send>;

/// Executor backed by a map from step identifier to an async closure.
pub struct MethodTable<E> {
    methods: FxHashMap<String, Method<E>>,
}

impl<E> MethodTable<E> {
    pub fn new() -> Self {
        Self {
            methods: FxHashMap::default(),
        }
    }

    pub fn insert<F>(&mut self, identifier: impl Into<String>, method: F)
    where
        F: FnMut() -> StepFuture<'static, E> + Send + 'static,
    {
        self.methods.insert(identifier.into(), Box::new(method));
    }

    pub fn with<F>(mut self, identifier: impl Into<String>, method: F) -> Self
    where
        F: FnMut() -> StepFuture<'static, E> + Send + 'static,
    {
        self.insert(identifier, method);
        self
    }
}

impl<E> Default for MethodTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for MethodTable<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<E: fmt::Display> StepExecutor for MethodTable<E> {
    type Error = E;

    fn supports(&self, identifier: &str) -> bool {
        self.methods.contains_key(identifier)
    }

    fn execute(&mut self, identifier: &str) -> Option<StepFuture<'_, E>> {
        self.methods.get_mut(identifier).map(|method| method())
    }
}
