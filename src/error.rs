//! Custom error types for the SMU control pipeline.
//!
//! This module defines the primary error type, `SmuError`, shared by every layer of the
//! crate. Using the `thiserror` crate, it provides a centralized and consistent way to
//! report failures, from a serial read that never completed to a configuration that was
//! rejected before anything reached the instrument.
//!
//! ## Error Hierarchy
//!
//! - **`Timeout`**: No terminated line arrived within the channel's read timeout.
//! - **`Transport`**: Any other communication failure, including use of a closed channel.
//! - **`Configuration`**: Local validation failed. Nothing was sent to the instrument.
//! - **`MalformedData`**: A fetched blob could not be reshaped into records, or a token was
//!   not numeric.
//! - **`ComplianceTripped`**: The instrument reports that its protection threshold clamped
//!   the last measurement.
//! - **`Config`**, **`Io`**, **`Storage`**, **`FeatureNotEnabled`**: ambient failures from
//!   settings loading, file I/O, persistence, and compile-time feature selection.
//!
//! A zero current reading is deliberately *not* an error: the derived resistance is left
//! non-finite so callers can detect it explicitly.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, SmuError>;

#[derive(Error, Debug)]
pub enum SmuError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial read timeout after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Compliance tripped: {function} exceeded protection {compliance}")]
    ComplianceTripped { function: String, compliance: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl SmuError {
    /// True for failures of the link itself.
    ///
    /// Callers are not expected to distinguish a timeout from other communication
    /// failures; both simply end the current operation.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SmuError::Timeout(_) | SmuError::Transport(_) | SmuError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SmuError::Configuration("compliance 1E-6 below range 1E-3".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration validation error: compliance 1E-6 below range 1E-3"
        );
    }

    #[test]
    fn test_compliance_tripped_names_values() {
        let err = SmuError::ComplianceTripped {
            function: "current".into(),
            compliance: "1.000000E-03".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("current"));
        assert!(msg.contains("1.000000E-03"));
    }

    #[test]
    fn timeouts_and_transport_errors_are_grouped() {
        assert!(SmuError::Timeout(Duration::from_secs(3)).is_transport());
        assert!(SmuError::Transport("channel closed".into()).is_transport());
        assert!(!SmuError::MalformedData("x".into()).is_transport());
    }
}
