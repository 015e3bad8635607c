//! Error types for the camera pipeline

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::capture::frame::FourCc;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the device controller, buffers and converters.
///
/// Failures inside the fulfillment worker never reach a caller through this
/// type; they are absorbed into per-buffer status in the capture result.
#[derive(Debug, Error)]
pub enum Error {
    /// Null, empty or malformed input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation called before the required setup step
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Device already open
    #[error("Camera {0} is busy")]
    Busy(u32),

    /// Reprocessing requests, unrecognized formats and the like
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Fence wait exceeded its bound
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Missing metadata entry or template
    #[error("Not found: {0}")]
    NotFound(String),

    /// Buffer layout cannot be derived for this pixel format
    #[error("Invalid pixel format {0}")]
    InvalidFormat(FourCc),

    /// Data size larger than a fixed-capacity buffer
    #[error("Buffer overflow: buffer only has {capacity} bytes, but data needs {requested}")]
    BufferOverflow { requested: usize, capacity: usize },

    /// No camera with that id
    #[error("No such camera: {0}")]
    NoDevice(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JPEG error: {0}")]
    Jpeg(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        Self::Io(io::Error::from(errno))
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Self::Jpeg(err.to_string())
    }
}

impl From<jpeg_decoder::Error> for Error {
    fn from(err: jpeg_decoder::Error) -> Self {
        Self::Jpeg(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_display() {
        let err = Error::BufferOverflow {
            requested: 10,
            capacity: 4,
        };
        assert_eq!(
            err.to_string(),
            "Buffer overflow: buffer only has 4 bytes, but data needs 10"
        );
    }

    #[test]
    fn test_errno_maps_to_io() {
        let err = Error::from(nix::errno::Errno::EINTR);
        assert!(matches!(err, Error::Io(_)));
    }
}
