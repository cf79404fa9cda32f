//! Error handling for the vote intake pipeline

/// Result type alias for the vote intake pipeline
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the vote intake pipeline
///
/// Rule violations found while processing an event are not errors; they are
/// reported as [`crate::outcome::ProcessOutcome`] variants. This type covers
/// infrastructure faults and malformed input only.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Storage layer failures (connection loss, timeout, poisoned state)
    #[error("Store error: {message}")]
    Store { message: String },

    /// Transport or broker unavailable while publishing
    #[error("Publish error: {message}")]
    Publish { message: String },

    /// A referenced record does not exist
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Validation errors
    #[error("Validation failed: {field}")]
    Validation { field: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot file I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors surfaced to the intake caller when an event cannot be enqueued
pub type PublishError = Error;

impl Error {
    /// Create a new store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a new publish error
    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish {
            message: message.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation can change the result
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Publish { .. })
    }
}

/// Convenience macros for creating specific error types
#[macro_export]
macro_rules! store_error {
    ($msg:expr) => {
        $crate::Error::store($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::store(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! publish_error {
    ($msg:expr) => {
        $crate::Error::publish($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::publish(format!($fmt, $($arg)*))
    };
}
