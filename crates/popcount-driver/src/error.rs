//! Error types for popcount driver operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for popcount operations
pub type Result<T> = std::result::Result<T, PopcountError>;

/// Errors that can occur while driving the popcount peripheral
#[derive(Debug, Error)]
pub enum PopcountError {
    /// Device node or sysfs attribute not found at the expected path
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Register or buffer transfer failed
    #[error("Transfer failed: {reason}")]
    TransferFailed {
        /// Reason for failure
        reason: String,
    },

    /// Device is in an invalid state
    #[error("Device in invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Operation timeout
    #[error("{operation} timed out after {polls} polls")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// Number of status polls performed
        polls: u32,
    },

    /// Hardware reported an error
    #[error("Hardware error: {reason}")]
    HardwareError {
        /// Reason for failure
        reason: String,
    },

    /// Configuration rejected before touching hardware
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Reason for rejection
        reason: String,
    },

    /// Bitstream could not be handed to the FPGA manager
    #[error("Failed to program {manager}: {reason}")]
    ProgramFailed {
        /// FPGA manager instance
        manager: String,
        /// Reason for failure
        reason: String,
    },
}

impl PopcountError {
    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, polls: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            polls,
        }
    }

    /// Create a hardware error
    pub fn hardware_error(reason: impl Into<String>) -> Self {
        Self::HardwareError {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a program failed error
    pub fn program_failed(manager: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProgramFailed {
            manager: manager.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_operation() {
        let err = PopcountError::timeout("DMA idle", 1000);
        assert_eq!(err.to_string(), "DMA idle timed out after 1000 polls");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PopcountError = io.into();
        assert!(matches!(err, PopcountError::Io { .. }));
    }
}
