use thiserror::Error;

/// Boxed error returned by an evaluator.
pub type EvaluatorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the sweep runner
#[derive(Error, Debug)]
pub enum XpError {
    #[error("Shared memory error: {0}")]
    Shared(#[from] SharedMemoryError),

    #[error("Sweep error: {0}")]
    Sweep(#[from] SweepError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Shared segment errors
#[derive(Error, Debug)]
pub enum SharedMemoryError {
    #[error("Resource exhausted while allocating segment {segment} ({bytes} bytes): {message}")]
    ResourceExhausted {
        segment: String,
        bytes: usize,
        message: String,
    },

    #[error("Segment not found: {segment}")]
    SegmentNotFound { segment: String },

    #[error("Segment {segment} holds {actual} bytes, handle implies {expected}")]
    LayoutMismatch {
        segment: String,
        expected: usize,
        actual: usize,
    },

    #[error("Element type mismatch: buffer holds {actual}, requested {requested}")]
    TypeMismatch { actual: String, requested: String },

    #[error("Invalid segment name: {segment}")]
    InvalidSegmentName { segment: String },
}

/// Sweep coordination errors
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Evaluation failed for configuration #{index}: {cause}")]
    EvaluationFailed {
        index: usize,
        #[source]
        cause: EvaluatorError,
    },

    #[error("Worker pool could not start with {pool_size} workers: {message}")]
    PoolStartupFailed { pool_size: usize, message: String },
}

/// Remote delegation errors
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Runner not ready: {runner}")]
    RunnerNotReady { runner: String },

    #[error("Command failed: {command}, status: {status}")]
    CommandFailed { command: String, status: String },

    #[error("Request not found: {name}")]
    MissingRequest { name: String },

    #[error("Result missing for request: {name}")]
    MissingResult { name: String },
}

impl XpError {
    /// Index of the configuration whose evaluation failed, if this is an
    /// evaluation failure.
    pub fn failed_configuration(&self) -> Option<usize> {
        match self {
            XpError::Sweep(SweepError::EvaluationFailed { index, .. }) => Some(*index),
            _ => None,
        }
    }

    pub fn is_segment_not_found(&self) -> bool {
        matches!(
            self,
            XpError::Shared(SharedMemoryError::SegmentNotFound { .. })
        )
    }
}

/// Result type alias for sweep operations
pub type XpResult<T> = Result<T, XpError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::XpError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::XpError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::XpError::Config(format!($($arg)*))
    };
}
