//! Store error types.
//!
//! Missing keys are not errors: operations report absence through `Ok(None)`
//! or `Ok(false)`. Everything in [`StoreError`] is a genuine failure.

use std::fmt;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend configuration is malformed (e.g. an unparsable endpoint).
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// A connectivity failure that may succeed if retried.
    #[error("Transient backend error: {message}")]
    Transient {
        /// Description of the underlying failure.
        message: String,
    },

    /// The caller supplied an invalid argument (e.g. a zero TTL).
    #[error("Validation error: {message}")]
    Validation {
        /// Description of why the argument was rejected.
        message: String,
    },

    /// A scalar operation was issued against a list key, or vice versa.
    #[error("Wrong type for key '{key}': expected {expected}")]
    WrongType {
        /// The offending key.
        key: String,
        /// The kind of value the operation expected.
        expected: &'static str,
    },

    /// The backend rejected the command for a non-transient reason.
    #[error("Backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },

    /// The store has been closed.
    #[error("Store is closed")]
    Closed,

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Transient` error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new `WrongType` error.
    #[must_use]
    pub fn wrong_type(key: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongType {
            key: key.into(),
            expected,
        }
    }

    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns `true` if the caller passed an invalid argument.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::WrongType { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Transient { .. } => ErrorCategory::Infrastructure,
            Self::Validation { .. } | Self::WrongType { .. } => ErrorCategory::Validation,
            Self::Backend { .. } | Self::Closed => ErrorCategory::Backend,
            Self::Serialization { .. } => ErrorCategory::Serialization,
        }
    }
}

/// Categories of store errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed configuration.
    Configuration,
    /// Infrastructure/connection error.
    Infrastructure,
    /// Invalid argument.
    Validation,
    /// Backend rejected the command.
    Backend,
    /// Encoding/decoding failure.
    Serialization,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Validation => write!(f, "validation"),
            Self::Backend => write!(f, "backend"),
            Self::Serialization => write!(f, "serialization"),
        }
    }
}
