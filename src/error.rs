use thiserror::Error;

use crate::domain::DenyReason;

/// A guard refused to admit the call. The wrapped operation was not invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("guard '{guard_id}' rejected call: {reason}")]
pub struct GuardRejected {
    pub guard_id: String,
    pub reason: DenyReason,
}

impl GuardRejected {
    pub fn new(guard_id: impl Into<String>, reason: DenyReason) -> Self {
        GuardRejected {
            guard_id: guard_id.into(),
            reason,
        }
    }
}

/// Missing or malformed guard configuration for an operation.
///
/// Recorded in telemetry; the call proceeds unless the guard fails closed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("configuration error for operation '{operation_id}': {detail}")]
pub struct ConfigurationError {
    pub operation_id: String,
    pub guard_id: Option<String>,
    pub detail: String,
}

impl ConfigurationError {
    pub fn new(
        operation_id: impl Into<String>,
        guard_id: Option<&str>,
        detail: impl Into<String>,
    ) -> Self {
        ConfigurationError {
            operation_id: operation_id.into(),
            guard_id: guard_id.map(str::to_string),
            detail: detail.into(),
        }
    }
}

/// A span sink failed. Logged and counted, never returned to callers.
#[derive(Error, Debug)]
#[error("telemetry sink '{sink}' failed: {detail}")]
pub struct TelemetryEmissionError {
    pub sink: String,
    pub detail: String,
}

/// Error returned from a guarded call.
///
/// `Call` carries the wrapped operation's own error untouched.
#[derive(Error, Debug)]
pub enum GuardError<E> {
    #[error(transparent)]
    Rejected(#[from] GuardRejected),

    #[error("{0}")]
    Call(E),
}

impl<E> GuardError<E> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, GuardError::Rejected(_))
    }

    pub fn rejection(&self) -> Option<&GuardRejected> {
        match self {
            GuardError::Rejected(rejected) => Some(rejected),
            GuardError::Call(_) => None,
        }
    }

    /// Recover the wrapped operation's error, if that is what this is.
    pub fn into_call_error(self) -> Option<E> {
        match self {
            GuardError::Call(e) => Some(e),
            GuardError::Rejected(_) => None,
        }
    }
}
