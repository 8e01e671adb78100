//! Custom error types for shmcom.
//!
//! Explicit enum error types only. No `Box<dyn Error>`, no `anyhow::Result`.
//! Contract violations are not errors: they abort through [`crate::fatal`].

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ElementFqId;

/// Top-level error type for the shmcom workspace.
#[derive(Debug, Error)]
pub enum ShmComError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Deployment
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Binding Errors - Reported to Proxy/Skeleton Users
    // =========================================================================
    #[error("Binding error: {0}")]
    Com(#[from] ComError),

    // =========================================================================
    // Shared Memory Errors
    // =========================================================================
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Recoverable errors surfaced by proxy and skeleton bindings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComError {
    #[error("Max sample count not realizable")]
    MaxSampleCountNotRealizable,

    #[error("Max number of subscribers exceeded")]
    MaxSubscribersExceeded,

    #[error("Event is not subscribed")]
    NotSubscribed,

    #[error("Could not restart proxy: {reason}")]
    CouldNotRestartProxy { reason: String },

    #[error("Binding failure: {reason}")]
    BindingFailure { reason: String },

    #[error("No free slot available for sample allocation")]
    SampleAllocationFailure,

    #[error("Service element not found: {element}")]
    ServiceElementNotFound { element: ElementFqId },
}

/// Hard validation errors prevent startup.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Duplicate event name: {name}")]
    DuplicateEventName { name: String },

    #[error("Duplicate element id {element_id} (event '{name}')")]
    DuplicateElementId { element_id: u16, name: String },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// Shared memory errors.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Failed to create shared memory region: {name} - {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Failed to map shared memory: {reason}")]
    MapFailed { reason: String },

    #[error("Placement out of bounds: offset {offset} + {len} > {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("Placement at offset {offset} violates alignment {align}")]
    Misaligned { offset: usize, align: usize },
}

/// Result type alias using ShmComError.
pub type ShmComResult<T> = Result<T, ShmComError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ElementType;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::MissingRequiredField {
            field: "application_id",
            context: "deployment root".to_string(),
        };
        assert!(err.to_string().contains("application_id"));
        assert!(err.to_string().contains("deployment root"));
    }

    #[test]
    fn test_error_chain() {
        let com_err = ComError::CouldNotRestartProxy {
            reason: "half-done reference".to_string(),
        };
        let top: ShmComError = com_err.into();
        assert!(matches!(top, ShmComError::Com(_)));
        assert!(top.to_string().contains("half-done reference"));
    }

    #[test]
    fn test_element_not_found_display() {
        let element = ElementFqId::new(7, 2, 1, ElementType::Event);
        let err = ComError::ServiceElementNotFound { element };
        assert_eq!(
            err.to_string(),
            "Service element not found: SID:7,EID:2,IID:1,TYPE:Event"
        );
    }
}
