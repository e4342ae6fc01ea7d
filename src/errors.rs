use std::fmt;

use thiserror::Error;

use crate::storage::StoreError;

/// A list of validation failures collected by a validating constructor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(pub Vec<String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }

    /// `Ok(())` when nothing was collected, otherwise the collected list.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("; "))
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Validation error: {0}")]
    Validation(ValidationErrors),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Job busy: {0}")]
    JobBusy(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Scheduler stopped")]
    SchedulerStopped,

    #[error("Cron error: {0}")]
    Cron(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ValidationErrors> for IngestError {
    fn from(errors: ValidationErrors) -> Self {
        IngestError::Validation(errors)
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Config(err.to_string())
    }
}
