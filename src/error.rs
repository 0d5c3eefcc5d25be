//! Error taxonomy and the diagnostic channel
//!
//! Nothing in the kernel is fatal. Programmer errors and behavior faults are
//! returned to the caller and also reported here, so a host that ignores the
//! `Result` still sees them in its log.

use thiserror::Error;

use crate::sim::{Handle, SequenceId, TemplateId};

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Misuse of the kernel API; the operation was a no-op
    ProgrammerError,
    /// A behavior sequence aborted and was removed
    BehaviorFault,
    /// A setting was rejected or an adjustment was skipped
    ConfigurationWarning,
}

/// Kernel error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Template not registered: {0:?}")]
    InvalidTemplate(TemplateId),

    #[error("Handle does not refer to a live instance: {0:?}")]
    StaleHandle(Handle),

    #[error("Instance released while already idle: {0:?}")]
    AlreadyIdle(Handle),

    #[error("Instance is idle, operation needs an active one: {0:?}")]
    NotActive(Handle),

    #[error("Behavior {sequence:?} on {handle:?} aborted: {message}")]
    BehaviorFault {
        handle: Handle,
        sequence: SequenceId,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration warning: {0}")]
    ConfigurationWarning(String),
}

impl Error {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidTemplate(_)
            | Error::StaleHandle(_)
            | Error::AlreadyIdle(_)
            | Error::NotActive(_) => ErrorCategory::ProgrammerError,
            Error::BehaviorFault { .. } => ErrorCategory::BehaviorFault,
            Error::InvalidConfig(_) | Error::ConfigurationWarning(_) => {
                ErrorCategory::ConfigurationWarning
            }
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error raised from inside a behavior; becomes [`Error::BehaviorFault`]
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct BehaviorError(pub String);

impl BehaviorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<Error> for BehaviorError {
    fn from(err: Error) -> Self {
        Self(err.to_string())
    }
}

/// Send an error to the diagnostic log.
///
/// Debug builds log at error level so mistakes are loud during development;
/// release builds keep it at debug level.
pub fn report(err: &Error) {
    match err.category() {
        ErrorCategory::ConfigurationWarning => log::debug!("{err}"),
        _ => {
            if cfg!(debug_assertions) {
                log::error!("{err}");
            } else {
                log::debug!("{err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let handle = Handle::new(3, 1);
        assert_eq!(
            Error::AlreadyIdle(handle).category(),
            ErrorCategory::ProgrammerError
        );
        assert_eq!(
            Error::InvalidTemplate(TemplateId(9)).category(),
            ErrorCategory::ProgrammerError
        );
        assert_eq!(
            Error::ConfigurationWarning("zero rate".into()).category(),
            ErrorCategory::ConfigurationWarning
        );
        let fault = Error::BehaviorFault {
            handle,
            sequence: SequenceId(7),
            message: "boom".into(),
        };
        assert_eq!(fault.category(), ErrorCategory::BehaviorFault);
        assert!(fault.to_string().contains("boom"));
    }

    #[test]
    fn test_behavior_error_from_kernel_error() {
        let err: BehaviorError = Error::NotActive(Handle::new(0, 1)).into();
        assert!(err.0.contains("idle"));
    }
}
