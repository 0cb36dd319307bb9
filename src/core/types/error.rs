//! Error types for the memory and host layers

use std::fmt;
use thiserror::Error;

/// Error type for memory and host operations
///
/// `AccessFault` is the only variant produced while scanning or probing
/// target memory; callers in the discovery path recover from it locally.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Access fault at {address}: {reason}")]
    AccessFault { address: String, reason: String },

    #[error("Invalid memory address: {0}")]
    InvalidAddress(String),

    #[error("Failed to write memory at {address}: {reason}")]
    WriteFailed { address: String, reason: String },

    #[error("Invalid pattern format: {0}")]
    InvalidPattern(String),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Allocation of {size} bytes failed: {reason}")]
    AllocationFailed { size: usize, reason: String },

    #[error("Native call failed: {0}")]
    CallFailed(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),
}

/// Result type alias for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

impl MemoryError {
    /// Creates an access fault error
    pub fn access_fault(address: impl fmt::Display, reason: impl Into<String>) -> Self {
        MemoryError::AccessFault {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a write failed error
    pub fn write_failed(address: impl fmt::Display, reason: impl Into<String>) -> Self {
        MemoryError::WriteFailed {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates an allocation failure
    pub fn allocation_failed(size: usize, reason: impl Into<String>) -> Self {
        MemoryError::AllocationFailed {
            size,
            reason: reason.into(),
        }
    }

    /// True for faults that discovery treats as a negative result
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            MemoryError::AccessFault { .. } | MemoryError::InvalidAddress(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MemoryError::access_fault("0x1000", "unmapped");
        assert_eq!(err.to_string(), "Access fault at 0x1000: unmapped");

        let err = MemoryError::allocation_failed(64, "heap exhausted");
        assert_eq!(
            err.to_string(),
            "Allocation of 64 bytes failed: heap exhausted"
        );
    }

    #[test]
    fn test_all_error_variants() {
        let errors: Vec<(MemoryError, &str)> = vec![
            (
                MemoryError::InvalidAddress("0x123".to_string()),
                "Invalid memory address: 0x123",
            ),
            (
                MemoryError::write_failed("0x2000", "read only"),
                "Failed to write memory at 0x2000: read only",
            ),
            (
                MemoryError::InvalidPattern("empty".to_string()),
                "Invalid pattern format: empty",
            ),
            (
                MemoryError::ProcessNotFound("4242".to_string()),
                "Process not found: 4242",
            ),
            (
                MemoryError::CallFailed("segfault".to_string()),
                "Native call failed: segfault",
            ),
            (
                MemoryError::UnsupportedOperation("trampolines".to_string()),
                "Unsupported operation: trampolines",
            ),
        ];

        for (error, expected) in errors {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_fault_classification() {
        assert!(MemoryError::access_fault("0x0", "null").is_fault());
        assert!(MemoryError::InvalidAddress("x".to_string()).is_fault());
        assert!(!MemoryError::CallFailed("x".to_string()).is_fault());
    }

    #[test]
    fn test_from_implementations() {
        use std::io;

        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "test");
        let mem_err: MemoryError = io_err.into();
        assert!(matches!(mem_err, MemoryError::IoError(_)));

        let utf8_err = String::from_utf8(vec![0xFF, 0xFE, 0xFD]).unwrap_err();
        let mem_err: MemoryError = utf8_err.into();
        assert!(matches!(mem_err, MemoryError::Utf8Error(_)));
    }
}
