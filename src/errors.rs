//! Error taxonomy for the collection gateway
//!
//! Every failure the gateway can report to a caller falls into one of the
//! variants below. The HTTP layer maps them to responses in `api_errors`.

use crate::error_classifier::ErrorMetadata;
use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Malformed input, always detected before any network access
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// The record exists but cannot be used for the requested operation
    #[error("{message}")]
    InvalidState { message: String },

    /// Node unreachable, pre-dispatch rejection or abandoned submission
    #[error("Connectivity error during {operation}: {message}")]
    Connectivity { operation: String, message: String },

    /// The ledger included the transaction but its execution failed
    #[error("{metadata}")]
    Dispatch { metadata: ErrorMetadata },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Result with GatewayError
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a connectivity error
    pub fn connectivity(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connectivity {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a dispatch error from classified metadata
    pub fn dispatch(metadata: ErrorMetadata) -> Self {
        Self::Dispatch { metadata }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }

    pub fn is_dispatch(&self) -> bool {
        matches!(self, Self::Dispatch { .. })
    }
}

/// Helper trait for mutex operations that return errors instead of panicking
pub trait SafeLock<T: ?Sized> {
    /// Lock a mutex, returning a GatewayError on poison
    fn safe_lock(&self) -> GatewayResult<std::sync::MutexGuard<'_, T>>;
}

impl<T: ?Sized> SafeLock<T> for std::sync::Mutex<T> {
    fn safe_lock(&self) -> GatewayResult<std::sync::MutexGuard<'_, T>> {
        self.lock()
            .map_err(|_| GatewayError::internal("mutex poisoned"))
    }
}

/// Read side of [`SafeLock`] for RwLock
pub trait SafeReadLock<T: ?Sized> {
    fn safe_read(&self) -> GatewayResult<std::sync::RwLockReadGuard<'_, T>>;
}

impl<T: ?Sized> SafeReadLock<T> for std::sync::RwLock<T> {
    fn safe_read(&self) -> GatewayResult<std::sync::RwLockReadGuard<'_, T>> {
        self.read()
            .map_err(|_| GatewayError::internal("rwlock poisoned (read)"))
    }
}

/// Write side of [`SafeLock`] for RwLock
pub trait SafeWriteLock<T: ?Sized> {
    fn safe_write(&self) -> GatewayResult<std::sync::RwLockWriteGuard<'_, T>>;
}

impl<T: ?Sized> SafeWriteLock<T> for std::sync::RwLock<T> {
    fn safe_write(&self) -> GatewayResult<std::sync::RwLockWriteGuard<'_, T>> {
        self.write()
            .map_err(|_| GatewayError::internal("rwlock poisoned (write)"))
    }
}

/// Convert from figment errors
impl From<figment::Error> for GatewayError {
    fn from(err: figment::Error) -> Self {
        GatewayError::config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = GatewayError::validation("itemId", "expected 64 hex digits");
        assert!(err.to_string().contains("Validation error"));
        assert!(err.is_validation());

        let err = GatewayError::not_found("Collection LOC", "d61e2e12");
        assert_eq!(err.to_string(), "Collection LOC not found: d61e2e12");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_dispatch_error_displays_metadata() {
        let err = GatewayError::dispatch(ErrorMetadata {
            pallet: "logionLoc".into(),
            error: "CollectionItemAlreadyExists".into(),
            details: "Item already exists".into(),
        });
        assert!(err.is_dispatch());
        assert!(err.to_string().contains("CollectionItemAlreadyExists"));
    }
}
