//! Tunnel error types

use std::io;
use thiserror::Error;

/// Result type for tunnel operations
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Errors that can occur during tunnel operations
#[derive(Debug, Error)]
pub enum TunnelError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Device creation failed
    #[error("Failed to create TUN device: {0}")]
    DeviceCreation(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Address resolution failed
    #[error("Address resolution failed: {0}")]
    Resolution(String),

    /// The TUN device failed while traffic was flowing
    #[error("TUN device failed: {0}")]
    DeviceFailed(String),

    /// The socket failed while holding traffic already taken off the device
    #[error("Connection failed with undeliverable traffic: {0}")]
    StreamFailed(String),

    /// Control channel error
    #[error("Control channel error: {0}")]
    Ctl(String),

    /// Platform not supported
    #[error("Platform not supported: {0}")]
    PlatformNotSupported(String),
}

impl TunnelError {
    /// True for failures that strike after setup, while packets are in
    /// flight. These map to a distinct process exit status.
    pub fn is_bridge_fatal(&self) -> bool {
        matches!(
            self,
            TunnelError::DeviceFailed(_) | TunnelError::StreamFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_fatal_classification() {
        assert!(TunnelError::DeviceFailed("eof".into()).is_bridge_fatal());
        assert!(TunnelError::StreamFailed("reset".into()).is_bridge_fatal());
        assert!(!TunnelError::Config("bad".into()).is_bridge_fatal());
        assert!(!TunnelError::Resolution("no host".into()).is_bridge_fatal());
        let io_err = TunnelError::Io(io::Error::new(io::ErrorKind::Other, "x"));
        assert!(!io_err.is_bridge_fatal());
    }
}
