//! Unified error types for the capture pipeline

use thiserror::Error;

/// Main error type for capture operations
#[derive(Error, Debug)]
pub enum CaptureError {
    /// No device answered to any of the accepted product descriptions
    #[error("Capture device not found (tried {0})")]
    DeviceNotFound(String),

    /// A step of the connect handshake failed
    #[error("Handshake step '{step}' failed: {message}")]
    Handshake {
        step: &'static str,
        message: String,
    },

    /// The identification word read back from the device is not an N3DSXL board
    #[error("Device identification failed: 0x{0:08x}")]
    Identification(u32),

    /// An in-flight bulk transfer could not be reaped or re-armed
    #[error("Transfer on slot {slot} failed: {message}")]
    Transfer { slot: usize, message: String },

    /// Operation requires a live connection
    #[error("Capture device not connected")]
    NotConnected,

    /// A slot carried fewer bytes than the payload needs
    #[error("Short payload: received {received} bytes, need {expected}")]
    ShortPayload { received: usize, expected: usize },

    /// Audio output device could not be opened or started
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Placeholder or snapshot image error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Image had unexpected dimensions
    #[error("Image is {width}x{height}, expected {expected_width}x{expected_height}")]
    ImageSize {
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    /// Pipeline already running
    #[error("Capture pipeline already running")]
    AlreadyRunning,

    /// Thread could not be spawned
    #[error("Thread error: {0}")]
    Thread(#[from] std::io::Error),
}

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, CaptureError>;

impl CaptureError {
    /// Create a handshake error with context
    pub fn handshake(step: &'static str, message: impl Into<String>) -> Self {
        Self::Handshake {
            step,
            message: message.into(),
        }
    }

    /// Create a transfer error with context
    pub fn transfer(slot: usize, message: impl Into<String>) -> Self {
        Self::Transfer {
            slot,
            message: message.into(),
        }
    }

    /// Check if this error is recoverable by reconnecting
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CaptureError::DeviceNotFound(_)
                | CaptureError::Handshake { .. }
                | CaptureError::Identification(_)
                | CaptureError::Transfer { .. }
                | CaptureError::NotConnected
                | CaptureError::ShortPayload { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(CaptureError::transfer(3, "abort failed").is_recoverable());
        assert!(CaptureError::handshake("write", "timeout").is_recoverable());
        assert!(CaptureError::Identification(0).is_recoverable());
        assert!(!CaptureError::AlreadyRunning.is_recoverable());
        assert!(!CaptureError::AudioOutput("no device".into()).is_recoverable());
    }

    #[test]
    fn test_display_identification() {
        let err = CaptureError::Identification(0x00c0_b0a2);
        assert_eq!(err.to_string(), "Device identification failed: 0x00c0b0a2");
    }
}
