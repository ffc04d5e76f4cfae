//! Error handling for Waveline
//!
//! Every error is recoverable and reportable to the caller; none is
//! process-fatal and none is used for normal control flow. Multi-step
//! timeline mutations roll back fully before surfacing an error.

use thiserror::Error;

/// Result type alias for Waveline operations
pub type Result<T> = std::result::Result<T, WavelineError>;

/// Main error type for Waveline operations
#[derive(Error, Debug)]
pub enum WavelineError {
    // Range Errors
    #[error("{what} out of bounds: {value} (limit {limit})")]
    OutOfBounds {
        what: &'static str,
        value: u64,
        limit: u64,
    },

    // Format Errors
    #[error("Invalid format: {reason}")]
    InvalidFormat { reason: String },

    // Stream Errors
    #[error("Source too short: requested {requested} bytes, {available} available")]
    SourceTooShort { requested: u64, available: u64 },

    #[error("Data missing for provider '{uid}'")]
    DataMissing { uid: String },

    #[error("Provider '{uid}' is busy: {reason}")]
    ResourceBusy { uid: String, reason: &'static str },

    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: &'static str },

    // Timeline Errors
    #[error("Timeline contains no audio")]
    EmptyTimeline,

    // Export Errors
    #[error("Destination already exists: {path}")]
    DestinationExists { path: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WavelineError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            WavelineError::OutOfBounds { .. } => "OUT_OF_BOUNDS",
            WavelineError::InvalidFormat { .. } => "INVALID_FORMAT",
            WavelineError::SourceTooShort { .. } => "SOURCE_TOO_SHORT",
            WavelineError::DataMissing { .. } => "DATA_MISSING",
            WavelineError::ResourceBusy { .. } => "RESOURCE_BUSY",
            WavelineError::Unsupported { .. } => "UNSUPPORTED",
            WavelineError::EmptyTimeline => "EMPTY_TIMELINE",
            WavelineError::DestinationExists { .. } => "DESTINATION_EXISTS",
            WavelineError::Io(_) => "IO_ERROR",
            WavelineError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = WavelineError::OutOfBounds {
            what: "insert point",
            value: 9001,
            limit: 9000,
        };
        assert_eq!(err.error_code(), "OUT_OF_BOUNDS");
    }

    #[test]
    fn test_busy_error_code() {
        let err = WavelineError::ResourceBusy {
            uid: "p-1".to_string(),
            reason: "write stream open",
        };
        assert_eq!(err.error_code(), "RESOURCE_BUSY");
    }

    #[test]
    fn test_display_includes_context() {
        let err = WavelineError::SourceTooShort {
            requested: 4410,
            available: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("4410"));
        assert!(msg.contains("100"));
    }
}
