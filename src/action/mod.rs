//! Resumable Multi-Step Actions
//!
//! A [`MultiStepAction`] is an ordered list of [`Step`]s driven strictly
//! sequentially by a [`StepExecutor`].
//!
//! # Step Lifecycle
//!
//! ```text
//! IDLE → ACTIVE → COMPLETED
//!           ↓
//!        FAILED (error message set, permanent)
//! ```
//!
//! # Resumption
//!
//! Completed steps are skipped on every later run, so an action rebuilt from
//! persisted data continues at its first incomplete step. A failed step is
//! never cleared; the action stays failed.

pub mod error;
pub mod multi_step;
pub mod step;

pub use error::{ActionError, ExecuteError, TransitionError};
pub use multi_step::{MethodTable, MultiStepAction, StepExecutor, StepFuture};
pub use step::Step;
