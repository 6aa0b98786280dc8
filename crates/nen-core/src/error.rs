//! Flow errors and the status codes they map to at the C boundary

use thiserror::Error;

/// Errors raised by the registry, executor and stats reporter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("allocation failed: {reason}")]
    AllocationFailed { reason: String },

    #[error("invalid or released flow handle")]
    InvalidHandle,

    #[error("flow is already running")]
    FlowBusy,

    #[error("execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("stats unavailable")]
    StatsUnavailable,

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },
}

impl FlowError {
    pub fn allocation(reason: impl Into<String>) -> Self {
        Self::AllocationFailed {
            reason: reason.into(),
        }
    }

    pub fn execution(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            reason: reason.into(),
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Status code reported across the C boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AllocationFailed { .. } => StatusCode::AllocationFailed,
            Self::InvalidHandle => StatusCode::InvalidHandle,
            Self::FlowBusy => StatusCode::FlowBusy,
            Self::ExecutionFailed { .. } => StatusCode::ExecutionFailed,
            Self::InvalidInput { .. } => StatusCode::InvalidInput,
            Self::StatsUnavailable => StatusCode::Internal,
        }
    }
}

pub type FlowResult<T> = std::result::Result<T, FlowError>;

/// Integer status returned by `nen_execute_flow` and friends.
///
/// Callers only rely on `0 = success`; the non-zero values narrow the cause.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success = 0,
    InvalidHandle = 1,
    ExecutionFailed = 2,
    FlowBusy = 3,
    AllocationFailed = 4,
    InvalidInput = 5,
    Internal = 6,
}

impl StatusCode {
    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

impl<T> From<&FlowResult<T>> for StatusCode {
    fn from(result: &FlowResult<T>) -> Self {
        match result {
            Ok(_) => StatusCode::Success,
            Err(e) => e.status_code(),
        }
    }
}
