//! Step - a single named unit of work

use serde::{Deserialize, Serialize};

use super::error::TransitionError;

/// A single named unit of work with a bounded lifecycle.
///
/// `failed` is derived from the presence of an error message, so a failure is
/// permanent once recorded. The `active` flag is runtime-only and never
/// persisted: an in-flight step cannot survive a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    identifier: String,
    label: String,
    #[serde(skip)]
    active: bool,
    #[serde(default)]
    completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl Step {
    pub fn new(identifier: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            label: label.into(),
            active: false,
            completed: false,
            error_message: None,
        }
    }

    /// Stable identifier, never renamed once shipped.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Display text, irrelevant to the protocol.
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.error_message.is_some()
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        !self.active && (self.completed || self.is_failed())
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn activate(&mut self) -> Result<(), TransitionError> {
        if self.active {
            return Err(TransitionError::AlreadyActive(self.identifier.clone()));
        }
        if self.is_done() {
            return Err(TransitionError::AlreadyDone(self.identifier.clone()));
        }
        self.active = true;
        Ok(())
    }

    pub fn deactivate(&mut self) -> Result<(), TransitionError> {
        if !self.active {
            return Err(TransitionError::NotActive(self.identifier.clone()));
        }
        self.active = false;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), TransitionError> {
        if self.completed || self.is_failed() {
            return Err(TransitionError::AlreadyDone(self.identifier.clone()));
        }
        self.completed = true;
        Ok(())
    }

    /// Marks the step failed. There is no way to clear the message again.
    pub fn set_error_message(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        if self.completed || self.is_failed() {
            return Err(TransitionError::AlreadyDone(self.identifier.clone()));
        }
        self.error_message = Some(message.into());
        Ok(())
    }
}
